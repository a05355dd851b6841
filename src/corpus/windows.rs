use crate::config::EngineConfig;
use crate::keywords::KeywordExtractor;
use crate::model::{Chunk, IndexUnit, UnitMetadata};
use crate::util::char_prefix;

/// Splits text into word windows of `window` words overlapping by `overlap`.
/// The last window always ends at the final word, so 1000 words with 400/100
/// gives exactly three windows. Empty text yields one empty window.
pub fn chunk_words(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let words = text.split_whitespace().collect::<Vec<&str>>();
    if words.is_empty() {
        return vec![String::new()];
    }

    let window = window.max(1);
    let step = window.saturating_sub(overlap).max(1);

    let mut out = Vec::<String>::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(words.len());
        out.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start += step;
    }
    out
}

/// Expands chunks into embeddable windows, preserving chunk order so store
/// positions follow corpus order.
pub fn build_index_units(
    chunks: &[Chunk],
    config: &EngineConfig,
    keywords: &KeywordExtractor,
) -> Vec<IndexUnit> {
    let mut units = Vec::<IndexUnit>::with_capacity(chunks.len());

    for chunk in chunks {
        let windows = chunk_words(&chunk.text, config.window_words, config.overlap_words);
        let single_window = windows.len() == 1;

        for window in windows {
            let unit_keywords = if single_window {
                chunk.keyword_set.clone()
            } else {
                keywords.extract(&window)
            };

            units.push(IndexUnit {
                metadata: UnitMetadata {
                    protocol_id: chunk.protocol_id.clone(),
                    icd10_code: chunk.icd10_code.clone(),
                    diagnosis: chunk.diagnosis_title.clone(),
                    source_file: chunk.source_file.clone(),
                    text_preview: char_prefix(&window, config.text_preview_chars),
                },
                text: window,
                keywords: unit_keywords,
            });
        }
    }

    units
}

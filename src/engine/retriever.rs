use std::collections::HashMap;

use tracing::debug;

use crate::keywords::overlap_count;
use crate::model::{fragment_explanation, RetrievedCode};
use crate::util::char_prefix;

use super::Engine;

const EVIDENCE_PREVIEW_CHARS: usize = 160;

struct CodeGroup {
    code: String,
    scores: Vec<f64>,
    best_position: usize,
    best_score: f64,
}

impl CodeGroup {
    fn mean(&self) -> f64 {
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}

impl Engine {
    /// Hybrid retrieval: cosine similarity plus a lexical boost per shared
    /// keyword, top units grouped by canonical code and ranked by group mean.
    /// `top_k` applies to code groups, not units.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievedCode> {
        if self.store.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_embedding = self.embedder.embed(query);
        let query_keywords = self.keywords.extract(query);

        let mut scored = self
            .store
            .similarity(&query_embedding)
            .into_iter()
            .map(|(position, similarity)| {
                let overlap = overlap_count(&query_keywords, &self.units[position].keywords);
                (
                    position,
                    similarity + self.config.lexical_boost_unit * overlap as f64,
                )
            })
            .collect::<Vec<(usize, f64)>>();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(self.config.raw_candidate_limit);

        let mut groups = Vec::<CodeGroup>::new();
        let mut group_index = HashMap::<String, usize>::new();
        for (position, score) in &scored {
            let code = self.codes.canonical(&self.units[*position].metadata.icd10_code);
            if code.is_empty() {
                continue;
            }

            match group_index.get(&code) {
                Some(index) => {
                    let group = &mut groups[*index];
                    group.scores.push(*score);
                    if *score > group.best_score {
                        group.best_score = *score;
                        group.best_position = *position;
                    }
                }
                None => {
                    group_index.insert(code.clone(), groups.len());
                    groups.push(CodeGroup {
                        code,
                        scores: vec![*score],
                        best_position: *position,
                        best_score: *score,
                    });
                }
            }
        }

        // Stable sort: equal means keep the order of their best unit.
        groups.sort_by(|left, right| right.mean().total_cmp(&left.mean()));
        groups.truncate(top_k);

        debug!(
            scored_units = scored.len(),
            code_groups = groups.len(),
            "hybrid retrieval completed"
        );

        groups
            .into_iter()
            .enumerate()
            .map(|(index, group)| {
                let best = &self.units[group.best_position].metadata;
                let mut evidence = vec![fragment_explanation(group.scores.len())];
                let preview = char_prefix(best.text_preview.trim(), EVIDENCE_PREVIEW_CHARS);
                if !preview.is_empty() {
                    evidence.push(format!("{}: {}", best.source_file, preview));
                }

                RetrievedCode {
                    rank: index + 1,
                    title: if best.diagnosis.trim().is_empty() {
                        group.code.clone()
                    } else {
                        best.diagnosis.clone()
                    },
                    protocol_id: best.protocol_id.clone(),
                    score: group.mean(),
                    fragment_count: group.scores.len(),
                    evidence,
                    icd10_code: group.code,
                }
            })
            .collect()
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::keywords::KeywordExtractor;
use crate::model::{Chunk, ProtocolRecord};

use super::fields::{optional_code_list, optional_string, parse_object};
use super::CorpusError;

/// Parses one NDJSON protocol line. Blank lines yield `Ok(None)`. A missing
/// `protocol_id` falls back to the source file name.
pub fn parse_protocol_line(
    origin: &str,
    line: &str,
) -> Result<Option<ProtocolRecord>, CorpusError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let object = parse_object(origin, trimmed)?;
    let protocol_id = optional_string(origin, &object, "protocol_id")?;
    let source_file = optional_string(origin, &object, "source_file")?;
    let title = optional_string(origin, &object, "title")?;
    let text = optional_string(origin, &object, "text")?;
    let icd_codes = optional_code_list(origin, &object, "icd_codes")?;

    let protocol_id = if protocol_id.trim().is_empty() {
        source_file.clone()
    } else {
        protocol_id
    };
    let title = if title.trim().is_empty() {
        source_file.clone()
    } else {
        title
    };

    Ok(Some(ProtocolRecord {
        protocol_id,
        source_file,
        title,
        text,
        icd_codes,
    }))
}

pub fn load_protocol_records(path: &Path) -> Result<Vec<ProtocolRecord>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open protocol corpus: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::<ProtocolRecord>::new();
    let mut skipped_lines = 0usize;
    let mut buffer = Vec::<u8>::new();
    let mut line_number = 0usize;

    loop {
        buffer.clear();
        let read = reader.read_until(b'\n', &mut buffer).with_context(|| {
            format!(
                "failed to read line {} of protocol corpus: {}",
                line_number + 1,
                path.display()
            )
        })?;
        if read == 0 {
            break;
        }
        line_number += 1;
        let origin = format!("{}:{}", path.display(), line_number);

        let line = match std::str::from_utf8(&buffer) {
            Ok(line) => line,
            Err(err) => {
                skipped_lines += 1;
                debug!(origin = %origin, error = %err, "skipping non-UTF-8 protocol line");
                continue;
            }
        };

        match parse_protocol_line(&origin, line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(err) => {
                skipped_lines += 1;
                debug!(error = %err, "skipping malformed protocol line");
            }
        }
    }

    if skipped_lines > 0 {
        warn!(
            path = %path.display(),
            skipped_lines,
            "protocol corpus contained malformed lines"
        );
    }
    info!(
        path = %path.display(),
        records = records.len(),
        "loaded protocol corpus"
    );

    Ok(records)
}

/// One chunk per (protocol, code); protocols without codes keep one chunk
/// with an empty code so their text still reaches the index.
pub fn build_chunks(records: &[ProtocolRecord], keywords: &KeywordExtractor) -> Vec<Chunk> {
    let mut chunks = Vec::<Chunk>::new();

    for record in records {
        let keyword_set = keywords.extract(&record.text);
        let make_chunk = |code: &str| Chunk {
            protocol_id: record.protocol_id.clone(),
            icd10_code: code.to_string(),
            diagnosis_title: record.title.clone(),
            text: record.text.clone(),
            source_file: record.source_file.clone(),
            keyword_set: keyword_set.clone(),
        };

        if record.icd_codes.is_empty() {
            chunks.push(make_chunk(""));
            continue;
        }

        for code in &record.icd_codes {
            chunks.push(make_chunk(code));
        }
    }

    chunks
}

use std::fs;
use std::path::Path;

use tracing::info;

use crate::keywords::KeywordExtractor;
use crate::model::{Chunk, EvaluationCase};

use super::fields::{parse_object, required_string};
use super::CorpusError;

pub fn parse_evaluation_case(
    case_id: &str,
    source_file: &str,
    raw: &str,
) -> Result<EvaluationCase, CorpusError> {
    let object = parse_object(source_file, raw)?;
    let gt = required_string(source_file, &object, "gt")?;
    let text = required_string(source_file, &object, "text")?;

    if gt.trim().is_empty() {
        return Err(CorpusError::MalformedValue {
            origin: source_file.to_string(),
            field: "gt",
            reason: "ground-truth code is blank".to_string(),
        });
    }

    Ok(EvaluationCase {
        case_id: case_id.to_string(),
        source_file: source_file.to_string(),
        gt: gt.trim().to_string(),
        text,
    })
}

/// Loads every `*.json` case in `dir`, sorted by file name. Any missing or
/// malformed field is fatal: serving from a half-valid corpus is refused.
pub fn load_evaluation_cases(dir: &Path) -> Result<Vec<EvaluationCase>, CorpusError> {
    let io_error = |source| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_json = path
            .extension()
            .map(|extension| extension.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if path.is_file() && is_json {
            paths.push(path);
        }
    }
    paths.sort();

    let mut cases = Vec::<EvaluationCase>::with_capacity(paths.len());
    for path in paths {
        let raw = fs::read_to_string(&path).map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        let case_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        cases.push(parse_evaluation_case(
            &case_id,
            &path.display().to_string(),
            &raw,
        )?);
    }

    info!(dir = %dir.display(), cases = cases.len(), "loaded evaluation corpus");
    Ok(cases)
}

pub fn evaluation_chunks(cases: &[EvaluationCase], keywords: &KeywordExtractor) -> Vec<Chunk> {
    cases
        .iter()
        .map(|case| Chunk {
            protocol_id: case.case_id.clone(),
            icd10_code: case.gt.clone(),
            diagnosis_title: case.gt.clone(),
            text: case.text.clone(),
            source_file: case.source_file.clone(),
            keyword_set: keywords.extract(&case.text),
        })
        .collect()
}

use std::io::{self, Write};
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::DiagnoseArgs;
use crate::commands::{elapsed_ms, read_request, shared_engine, write_json_stdout};
use crate::engine::{Engine, EngineCell};
use crate::model::{DiagnoseResponse, DiagnosisItem};

pub fn run(args: DiagnoseArgs, engines: &EngineCell) -> Result<()> {
    let request = read_request(args.symptoms.as_deref(), args.request.as_deref())?;
    let engine = shared_engine(engines, &args.engine)?;

    let response = diagnose(&engine, &request.symptoms, engine.config().top_k);
    info!(
        returned = response.diagnoses.len(),
        latency_ms = response.latency_ms,
        "diagnose completed"
    );

    if args.text {
        write_text_response(&response)
    } else {
        write_json_stdout(&response)
    }
}

/// Raw retrieval answer: one entry per code group, without clinical rules.
pub fn diagnose(engine: &Engine, symptoms: &str, top_k: usize) -> DiagnoseResponse {
    let started = Instant::now();

    if engine.is_empty() {
        warn!("corpus is empty; diagnose returns no entries");
    }

    let diagnoses = engine
        .retrieve(symptoms, top_k)
        .into_iter()
        .map(|item| DiagnosisItem {
            rank: item.rank,
            diagnosis: item.icd10_code.clone(),
            explanation: item.explanation(),
            icd10_code: item.icd10_code,
        })
        .collect();

    DiagnoseResponse {
        diagnoses,
        latency_ms: elapsed_ms(started),
    }
}

fn write_text_response(response: &DiagnoseResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Diagnoses: {}", response.diagnoses.len())?;
    for item in &response.diagnoses {
        writeln!(
            output,
            "{}.\t{}\t{}",
            item.rank, item.icd10_code, item.explanation
        )?;
    }
    writeln!(output, "Latency: {} ms", response.latency_ms)?;

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::corpus::build_chunks;
    use crate::keywords::KeywordExtractor;
    use crate::model::ProtocolRecord;
    use crate::semantic::resolve_model_config;

    fn engine(records: &[ProtocolRecord]) -> Engine {
        let keywords = KeywordExtractor::new().expect("keyword regex");
        Engine::from_chunks(
            EngineConfig::default(),
            resolve_model_config(""),
            &build_chunks(records, &keywords),
        )
        .expect("engine builds")
    }

    #[test]
    fn response_uses_code_as_diagnosis_and_explains_fragments() {
        let engine = engine(&[ProtocolRecord {
            protocol_id: "p-pneu".to_string(),
            source_file: "pneumonia.pdf".to_string(),
            title: "Пневмония".to_string(),
            text: "Кашель с мокротой, одышка, лихорадка.".to_string(),
            icd_codes: vec!["J18.9".to_string(), "J13".to_string()],
        }]);

        let response = diagnose(&engine, "кашель и одышка", 3);
        assert_eq!(response.diagnoses.len(), 2);
        for (index, item) in response.diagnoses.iter().enumerate() {
            assert_eq!(item.rank, index + 1);
            assert_eq!(item.diagnosis, item.icd10_code);
            assert_eq!(item.explanation, "Matched via 1 relevant protocol fragments");
        }

        let json = serde_json::to_value(&response).expect("serializes");
        assert!(json["latency_ms"].is_u64());
        assert!(json["diagnoses"][0]["rank"].is_u64());
    }

    #[test]
    fn empty_corpus_yields_no_entries() {
        let response = diagnose(&engine(&[]), "кашель", 3);
        assert!(response.diagnoses.is_empty());
    }
}

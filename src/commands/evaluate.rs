use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::EvaluateArgs;
use crate::commands::{corpus_source, elapsed_ms, shared_engine};
use crate::corpus::load_evaluation_cases;
use crate::engine::{Diagnoses, Engine, EngineCell, IcdNormalizer};
use crate::model::{EvaluationCase, EvaluationMiss, EvaluationReport};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: EvaluateArgs, engines: &EngineCell) -> Result<()> {
    let started_ts = Utc::now();
    let mut cases = load_evaluation_cases(&args.cases_dir).with_context(|| {
        format!(
            "failed to load evaluation cases from {}",
            args.cases_dir.display()
        )
    })?;
    if let Some(limit) = args.limit {
        cases.truncate(limit);
    }

    let engine = shared_engine(engines, &args.engine)?;
    let top_k = engine.config().top_k;
    info!(
        cases = cases.len(),
        top_k,
        units = engine.unit_count(),
        model_id = %engine.model().model_id,
        source = %corpus_source(&args.engine).describe(),
        "starting evaluation"
    );

    let mut report = evaluate(&engine, &cases, top_k);
    report.source = corpus_source(&args.engine).describe();
    report.cases_dir = args.cases_dir.display().to_string();

    let report_path = args.report_path.clone().unwrap_or_else(|| {
        args.engine.cache_root.join("reports").join(format!(
            "evaluation_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    write_json_pretty(&report_path, &report)?;

    info!(
        report = %report_path.display(),
        cases = report.case_count,
        hit_at_1 = report.hit_at_1,
        hit_at_k = report.hit_at_k,
        hit_at_1_rate = report.hit_at_1_rate,
        hit_at_k_rate = report.hit_at_k_rate,
        mean_latency_ms = report.mean_latency_ms,
        "evaluation completed"
    );
    Ok(())
}

/// Runs every case text through the full pipeline and scores the ranked
/// codes against the ground truth.
pub fn evaluate(engine: &Engine, cases: &[EvaluationCase], top_k: usize) -> EvaluationReport {
    let codes = engine.codes();
    let mut hit_at_1 = 0usize;
    let mut hit_at_k = 0usize;
    let mut emergency_count = 0usize;
    let mut total_latency_ms = 0u64;
    let mut misses = Vec::new();

    for case in cases {
        let started = Instant::now();
        let outcome = engine.diagnose(&case.text, top_k);
        total_latency_ms += elapsed_ms(started);

        if matches!(outcome, Diagnoses::Emergency(_)) {
            emergency_count += 1;
        }

        let predicted = outcome
            .candidates()
            .iter()
            .map(|candidate| candidate.icd10_code.clone())
            .collect::<Vec<String>>();
        let position = predicted
            .iter()
            .position(|code| codes_match(codes, code, &case.gt));

        match position {
            Some(0) => {
                hit_at_1 += 1;
                hit_at_k += 1;
            }
            Some(_) => hit_at_k += 1,
            None => misses.push(EvaluationMiss {
                case_id: case.case_id.clone(),
                gt: case.gt.clone(),
                predicted,
            }),
        }
    }

    if cases.is_empty() {
        warn!("evaluation ran without cases");
    }

    let case_count = cases.len();
    EvaluationReport {
        generated_at: now_utc_string(),
        source: String::new(),
        cases_dir: String::new(),
        top_k,
        case_count,
        hit_at_1,
        hit_at_k,
        hit_at_1_rate: rate(hit_at_1, case_count),
        hit_at_k_rate: rate(hit_at_k, case_count),
        emergency_count,
        mean_latency_ms: if case_count == 0 {
            0.0
        } else {
            total_latency_ms as f64 / case_count as f64
        },
        misses,
    }
}

/// A prediction counts when either code is the other or one of its subcodes.
pub fn codes_match(codes: &IcdNormalizer, predicted: &str, ground_truth: &str) -> bool {
    let predicted = codes.canonical(predicted);
    let ground_truth = codes.canonical(ground_truth);
    if predicted.is_empty() || ground_truth.is_empty() {
        return false;
    }
    codes.in_category(&predicted, &ground_truth) || codes.in_category(&ground_truth, &predicted)
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::EngineConfig;
    use crate::semantic::resolve_model_config;

    fn write_case(dir: &std::path::Path, name: &str, gt: &str, text: &str) {
        let body = serde_json::json!({ "gt": gt, "text": text });
        fs::write(dir.join(name), body.to_string()).expect("write case");
    }

    #[test]
    fn code_matching_accepts_subcodes_both_ways() {
        let codes = IcdNormalizer::new().expect("icd regex");
        assert!(codes_match(&codes, "K35.8", "K35"));
        assert!(codes_match(&codes, "k35", " K35.8 "));
        assert!(codes_match(&codes, "J18.9", "J18.9"));
        assert!(!codes_match(&codes, "J13", "J18"));
        assert!(!codes_match(&codes, "", ""));
    }

    #[test]
    fn evaluation_corpus_scores_its_own_cases() {
        let temp = tempdir().expect("tempdir");
        write_case(
            temp.path(),
            "001.json",
            "K35",
            "Острый аппендицит: боль в правой нижней части живота, тошнота, рвота.",
        );
        write_case(
            temp.path(),
            "002.json",
            "J18",
            "Пневмония: кашель с мокротой, одышка, лихорадка.",
        );
        write_case(
            temp.path(),
            "003.json",
            "I63",
            "Внезапно возник перекос лица и нарушение речи.",
        );

        let engine = Engine::from_evaluation_dir(
            EngineConfig::default(),
            resolve_model_config(""),
            temp.path(),
        )
        .expect("engine loads");
        let cases = load_evaluation_cases(temp.path()).expect("cases load");

        let report = evaluate(&engine, &cases, 3);
        assert_eq!(report.case_count, 3);
        assert_eq!(report.emergency_count, 1);
        assert_eq!(report.hit_at_k, 3);
        assert_eq!(report.hit_at_1, 3);
        assert!((report.hit_at_1_rate - 1.0).abs() < f64::EPSILON);
        assert!(report.misses.is_empty());
    }

    #[test]
    fn misses_record_predictions() {
        let temp = tempdir().expect("tempdir");
        write_case(
            temp.path(),
            "001.json",
            "K35",
            "боль в правой нижней части живота",
        );
        let engine = Engine::from_evaluation_dir(
            EngineConfig::default(),
            resolve_model_config(""),
            temp.path(),
        )
        .expect("engine loads");

        let cases = vec![EvaluationCase {
            case_id: "x".to_string(),
            source_file: "x.json".to_string(),
            gt: "Z99".to_string(),
            text: "боль в животе".to_string(),
        }];
        let report = evaluate(&engine, &cases, 3);
        assert_eq!(report.hit_at_k, 0);
        assert_eq!(report.misses.len(), 1);
        assert!(report.misses[0].predicted.contains(&"K35".to_string()));
        assert_eq!(report.misses[0].gt, "Z99");
    }
}

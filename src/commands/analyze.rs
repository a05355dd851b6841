use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::cli::AnalyzeArgs;
use crate::commands::{elapsed_ms, read_request, shared_engine, write_json_stdout};
use crate::engine::{Engine, EngineCell};
use crate::followup::{FollowupClient, FollowupConfig};
use crate::model::{AnalyzeResponse, AnalyzedDiagnosis, DiagnoseRequest};

pub fn run(args: AnalyzeArgs, engines: &EngineCell) -> Result<()> {
    let followup = FollowupClient::new(FollowupConfig::resolve(
        args.followup_url.as_deref(),
        args.followup_timeout_secs,
    ))?;
    info!(
        followup_configured = followup.config().is_configured(),
        timeout_secs = followup.config().timeout.as_secs_f64(),
        "analyze requested"
    );

    if let Some(path) = &args.requests {
        return run_batch(&args, engines, &followup, path);
    }

    let request = read_request(args.symptoms.as_deref(), args.request.as_deref())?;
    let engine = shared_engine(engines, &args.engine)?;
    let response = analyze(
        &engine,
        &followup,
        &request.symptoms,
        engine.config().top_k,
        args.questions,
    );
    info!(
        status = %response.status,
        returned = response.top_diagnoses.len(),
        latency_ms = response.latency_ms,
        "analyze completed"
    );

    if args.text {
        write_text_response(&response)
    } else {
        write_json_stdout(&response)
    }
}

/// Rule-aware pipeline plus clarifying questions. The same questions are
/// attached to every diagnosis of the request.
pub fn analyze(
    engine: &Engine,
    followup: &FollowupClient,
    symptoms: &str,
    top_k: usize,
    question_count: usize,
) -> AnalyzeResponse {
    let started = Instant::now();
    let outcome = engine.diagnose(symptoms, top_k);

    let questions = if outcome.candidates().is_empty() || question_count == 0 {
        Vec::new()
    } else {
        followup.questions_or_fallback(symptoms, question_count)
    };

    let top_diagnoses = outcome
        .candidates()
        .iter()
        .map(|candidate| AnalyzedDiagnosis {
            name: candidate.name.clone(),
            icd10_code: candidate.icd10_code.clone(),
            protocol_id: candidate.protocol_id.clone(),
            score: candidate.score,
            confidence: candidate.confidence,
            evidence: candidate.evidence.clone(),
            recommended_questions: questions.clone(),
        })
        .collect();

    AnalyzeResponse {
        status: outcome.status().to_string(),
        top_diagnoses,
        latency_ms: elapsed_ms(started),
    }
}

fn run_batch(
    args: &AnalyzeArgs,
    engines: &EngineCell,
    followup: &FollowupClient,
    path: &Path,
) -> Result<()> {
    let requests = load_batch_requests(path)?;
    let workers = args.workers.clamp(1, requests.len().max(1));
    info!(
        path = %path.display(),
        requests = requests.len(),
        workers,
        "starting analyze batch"
    );

    let cursor = AtomicUsize::new(0);
    let mut answered = thread::scope(|scope| -> Result<Vec<(usize, AnalyzeResponse)>> {
        let handles = (0..workers)
            .map(|worker| {
                let requests = &requests;
                let cursor = &cursor;
                scope.spawn(move || -> Result<Vec<(usize, AnalyzeResponse)>> {
                    let mut local = Vec::new();
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(request) = requests.get(index) else {
                            break;
                        };

                        let engine = shared_engine(engines, &args.engine)?;
                        let response = analyze(
                            &engine,
                            followup,
                            &request.symptoms,
                            engine.config().top_k,
                            args.questions,
                        );
                        debug!(worker, index, status = %response.status, "request analyzed");
                        local.push((index, response));
                    }
                    Ok(local)
                })
            })
            .collect::<Vec<_>>();

        let mut answered = Vec::with_capacity(requests.len());
        for handle in handles {
            let local = handle
                .join()
                .map_err(|_| anyhow!("analyze worker panicked"))??;
            answered.extend(local);
        }
        Ok(answered)
    })?;
    answered.sort_by_key(|(index, _)| *index);

    let mut output = io::BufWriter::new(io::stdout().lock());
    for (_, response) in &answered {
        serde_json::to_writer(&mut output, response)
            .context("failed to serialize analyze response")?;
        writeln!(output)?;
    }
    output.flush()?;

    info!(
        answered = answered.len(),
        engine_loads = engines.load_count(),
        "analyze batch completed"
    );
    Ok(())
}

/// NDJSON of `{"symptoms": ...}`; blank lines are ignored, anything else that
/// does not parse is an error naming the line.
pub fn load_batch_requests(path: &Path) -> Result<Vec<DiagnoseRequest>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut requests = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} of {}", index + 1, path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let request = serde_json::from_str::<DiagnoseRequest>(&line).with_context(|| {
            format!("invalid request on line {} of {}", index + 1, path.display())
        })?;
        if request.symptoms.trim().is_empty() {
            bail!("empty symptoms on line {} of {}", index + 1, path.display());
        }
        requests.push(request);
    }

    Ok(requests)
}

fn write_text_response(response: &AnalyzeResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Status: {}\tLatency: {} ms",
        response.status, response.latency_ms
    )?;
    for (index, diagnosis) in response.top_diagnoses.iter().enumerate() {
        writeln!(
            output,
            "{}.\t{}\t{}\tconfidence={:.2}\tprotocol={}",
            index + 1,
            diagnosis.icd10_code,
            diagnosis.name,
            diagnosis.confidence.unwrap_or(diagnosis.score),
            diagnosis.protocol_id
        )?;
        for evidence in &diagnosis.evidence {
            writeln!(output, "\tevidence: {evidence}")?;
        }
    }

    if let Some(first) = response.top_diagnoses.first() {
        for question in &first.recommended_questions {
            writeln!(output, "\t? {question}")?;
        }
    }

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::EngineConfig;
    use crate::corpus::build_chunks;
    use crate::followup::canned_questions;
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

    fn appendicitis() -> ProtocolRecord {
        ProtocolRecord {
            protocol_id: "p-app".to_string(),
            source_file: "appendicitis.pdf".to_string(),
            title: "Острый аппендицит".to_string(),
            text: "Боль в правой нижней части живота, тошнота, рвота.".to_string(),
            icd_codes: vec!["K35".to_string()],
        }
    }

    fn offline_followup() -> FollowupClient {
        FollowupClient::new(FollowupConfig::default()).expect("client builds")
    }

    #[test]
    fn unconfigured_followup_leaves_questions_empty() {
        let response = analyze(
            &engine(&[appendicitis()]),
            &offline_followup(),
            "боль в правой нижней части живота",
            3,
            3,
        );

        assert_eq!(response.status, "ok");
        assert_eq!(response.top_diagnoses.len(), 3);
        assert_eq!(response.top_diagnoses[0].icd10_code, "K35");
        assert_eq!(response.top_diagnoses[0].confidence, Some(1.0));
        assert!(response
            .top_diagnoses
            .iter()
            .all(|diagnosis| diagnosis.recommended_questions.is_empty()));
    }

    #[test]
    fn unreachable_followup_attaches_canned_questions() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/", listener.local_addr().expect("addr"));
        drop(listener);
        let followup =
            FollowupClient::new(FollowupConfig::new(Some(&url), 2.0)).expect("client builds");

        let response = analyze(&engine(&[appendicitis()]), &followup, "кашель", 3, 2);
        assert!(response
            .top_diagnoses
            .iter()
            .all(|diagnosis| diagnosis.recommended_questions == canned_questions(2)));
    }

    #[test]
    fn emergency_and_empty_corpus_statuses() {
        let emergency = analyze(
            &engine(&[]),
            &offline_followup(),
            "внезапно нарушение речи",
            3,
            3,
        );
        assert_eq!(emergency.status, "emergency");
        assert_eq!(emergency.top_diagnoses[0].icd10_code, "I63");

        let empty = analyze(&engine(&[]), &offline_followup(), "кашель", 3, 3);
        assert_eq!(empty.status, "empty_corpus");
        assert!(empty.top_diagnoses.is_empty());

        let json = serde_json::to_value(&empty).expect("serializes");
        assert_eq!(json["top_diagnoses"], serde_json::json!([]));
    }

    #[test]
    fn batch_requests_skip_blank_lines_and_reject_bad_ones() {
        let temp = tempdir().expect("tempdir");
        let good = temp.path().join("good.jsonl");
        fs::write(
            &good,
            "{\"symptoms\": \"кашель\"}\n\n{\"symptoms\": \"боль в животе\"}\n",
        )
        .expect("write batch");
        let requests = load_batch_requests(&good).expect("batch parses");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].symptoms, "боль в животе");

        let bad = temp.path().join("bad.jsonl");
        fs::write(&bad, "{\"symptoms\": \"кашель\"}\n{\"query\": 1}\n").expect("write batch");
        let err = load_batch_requests(&bad).expect_err("missing symptoms is an error");
        assert!(format!("{err:#}").contains("line 2"));

        let blank = temp.path().join("blank.jsonl");
        fs::write(&blank, "{\"symptoms\": \"   \"}\n").expect("write batch");
        assert!(load_batch_requests(&blank).is_err());
    }
}

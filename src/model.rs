use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::semantic::SemanticModelConfig;

/// One line of the protocol corpus after boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolRecord {
    pub protocol_id: String,
    pub source_file: String,
    pub title: String,
    pub text: String,
    pub icd_codes: Vec<String>,
}

/// One evaluation case file: ground-truth code plus protocol or complaint text.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationCase {
    pub case_id: String,
    pub source_file: String,
    pub gt: String,
    pub text: String,
}

/// A protocol paired with exactly one ICD-10 code (possibly empty).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub protocol_id: String,
    pub icd10_code: String,
    pub diagnosis_title: String,
    pub text: String,
    pub source_file: String,
    pub keyword_set: HashSet<String>,
}

/// One embedded word window of a chunk. Store positions and unit positions
/// are the same index space.
#[derive(Debug, Clone)]
pub struct IndexUnit {
    pub metadata: UnitMetadata,
    pub text: String,
    pub keywords: HashSet<String>,
}

/// Parallel metadata entry persisted next to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub protocol_id: String,
    pub icd10_code: String,
    pub diagnosis: String,
    pub source_file: String,
    pub text_preview: String,
}

/// Code-level retrieval result after grouping units by canonical code.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedCode {
    pub rank: usize,
    pub icd10_code: String,
    pub title: String,
    pub protocol_id: String,
    pub score: f64,
    pub fragment_count: usize,
    pub evidence: Vec<String>,
}

impl RetrievedCode {
    pub fn explanation(&self) -> String {
        fragment_explanation(self.fragment_count)
    }
}

pub fn fragment_explanation(fragment_count: usize) -> String {
    format!("Matched via {fragment_count} relevant protocol fragments")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub name: String,
    pub icd10_code: String,
    pub protocol_id: String,
    pub score: f64,
    pub evidence: Vec<String>,
    pub confidence: Option<f64>,
}

impl Candidate {
    pub fn new(
        name: impl Into<String>,
        icd10_code: impl Into<String>,
        protocol_id: impl Into<String>,
        score: f64,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            icd10_code: icd10_code.into(),
            protocol_id: protocol_id.into(),
            score,
            evidence,
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnoseRequest {
    pub symptoms: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisItem {
    pub rank: usize,
    pub diagnosis: String,
    pub icd10_code: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnoseResponse {
    pub diagnoses: Vec<DiagnosisItem>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedDiagnosis {
    pub name: String,
    pub icd10_code: String,
    pub protocol_id: String,
    pub score: f64,
    pub confidence: Option<f64>,
    pub evidence: Vec<String>,
    pub recommended_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub status: String,
    pub top_diagnoses: Vec<AnalyzedDiagnosis>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub index_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub command: String,
    pub model: SemanticModelConfig,
    pub engine: EngineConfig,
    pub paths: IndexPaths,
    pub counts: IndexCounts,
    pub corpus_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPaths {
    pub cache_root: String,
    pub protocols_path: String,
    pub index_dir: String,
    pub db_path: String,
    pub metadata_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexCounts {
    pub records: usize,
    pub chunks: usize,
    pub codeless_chunks: usize,
    pub units: usize,
    pub distinct_codes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub generated_at: String,
    pub source: String,
    pub cases_dir: String,
    pub top_k: usize,
    pub case_count: usize,
    pub hit_at_1: usize,
    pub hit_at_k: usize,
    pub hit_at_1_rate: f64,
    pub hit_at_k_rate: f64,
    pub emergency_count: usize,
    pub mean_latency_ms: f64,
    pub misses: Vec<EvaluationMiss>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationMiss {
    pub case_id: String,
    pub gt: String,
    pub predicted: Vec<String>,
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::followup::DEFAULT_QUESTION_COUNT;
use crate::semantic::DEFAULT_MODEL_ID;

#[derive(Parser, Debug)]
#[command(
    name = "qazdx",
    version,
    about = "Protocol-grounded symptom triage with ICD-10 ranking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Index(IndexArgs),
    Diagnose(DiagnoseArgs),
    Analyze(AnalyzeArgs),
    Evaluate(EvaluateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/qazdx")]
    pub cache_root: PathBuf,

    /// NDJSON protocol corpus.
    #[arg(long)]
    pub protocols: PathBuf,

    #[arg(long)]
    pub index_dir: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub engine_config: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,
}

/// Where the engine loads its corpus from and how it is tuned.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    #[arg(long, default_value = ".cache/qazdx")]
    pub cache_root: PathBuf,

    /// Persisted index directory; defaults to `<cache-root>/index`.
    #[arg(long, conflicts_with = "corpus_dir")]
    pub index_dir: Option<PathBuf>,

    /// Serve from a directory of `{gt, text}` evaluation cases instead.
    #[arg(long)]
    pub corpus_dir: Option<PathBuf>,

    #[arg(long)]
    pub engine_config: Option<PathBuf>,

    /// Embedding model for `--corpus-dir`; persisted indexes carry their own.
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long)]
    pub top_k: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, required_unless_present = "request", conflicts_with = "request")]
    pub symptoms: Option<String>,

    /// JSON file holding `{"symptoms": ...}`.
    #[arg(long)]
    pub request: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub text: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, conflicts_with_all = ["request", "requests"])]
    pub symptoms: Option<String>,

    #[arg(long, conflicts_with = "requests")]
    pub request: Option<PathBuf>,

    /// NDJSON batch of `{"symptoms": ...}` requests; answers are NDJSON in
    /// input order.
    #[arg(long)]
    pub requests: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = DEFAULT_QUESTION_COUNT)]
    pub questions: usize,

    /// Falls back to `QAZDX_FOLLOWUP_URL`.
    #[arg(long)]
    pub followup_url: Option<String>,

    /// Falls back to `QAZDX_FOLLOWUP_TIMEOUT`, then 25 seconds.
    #[arg(long)]
    pub followup_timeout_secs: Option<f64>,

    #[arg(long, default_value_t = false)]
    pub text: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Directory of `{gt, text}` cases to run as queries.
    #[arg(long)]
    pub cases_dir: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/qazdx")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub index_dir: Option<PathBuf>,
}

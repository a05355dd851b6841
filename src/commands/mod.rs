pub mod analyze;
pub mod diagnose;
pub mod evaluate;
pub mod index;
pub mod status;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::cli::EngineArgs;
use crate::config::EngineConfig;
use crate::engine::{CorpusSource, Engine, EngineCell};
use crate::model::DiagnoseRequest;
use crate::semantic::resolve_model_config;

pub fn default_index_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("index")
}

pub fn corpus_source(args: &EngineArgs) -> CorpusSource {
    match &args.corpus_dir {
        Some(dir) => CorpusSource::EvaluationDir(dir.clone()),
        None => CorpusSource::Index(
            args.index_dir
                .clone()
                .unwrap_or_else(|| default_index_dir(&args.cache_root)),
        ),
    }
}

/// Loads the engine on first use; later callers share the same instance.
pub fn shared_engine(cell: &EngineCell, args: &EngineArgs) -> Result<Arc<Engine>> {
    cell.get_or_init(|| {
        let config = EngineConfig::load(args.engine_config.as_deref())?.with_top_k(args.top_k)?;
        let source = corpus_source(args);
        Engine::load(&source, config, resolve_model_config(&args.model_id))
            .with_context(|| format!("failed to load engine from {}", source.describe()))
    })
}

/// Either an inline `--symptoms` value or a `{"symptoms": ...}` request file.
pub fn read_request(symptoms: Option<&str>, request_path: Option<&Path>) -> Result<DiagnoseRequest> {
    let request = match (symptoms, request_path) {
        (Some(symptoms), _) => DiagnoseRequest {
            symptoms: symptoms.to_string(),
        },
        (None, Some(path)) => {
            let raw = fs::read(path)
                .with_context(|| format!("failed to read request {}", path.display()))?;
            serde_json::from_slice::<DiagnoseRequest>(&raw)
                .with_context(|| format!("failed to parse request {}", path.display()))?
        }
        (None, None) => bail!("either --symptoms or --request is required"),
    };

    if request.symptoms.trim().is_empty() {
        bail!("symptoms text is empty");
    }
    Ok(request)
}

pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub fn write_json_stdout<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

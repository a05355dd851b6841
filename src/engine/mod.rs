mod handle;
mod icd;
mod rank;
mod retriever;
mod rules;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::corpus::{build_index_units, evaluation_chunks, load_evaluation_cases};
use crate::keywords::KeywordExtractor;
use crate::model::{Candidate, Chunk, IndexUnit};
use crate::semantic::{LocalEmbedder, SemanticModelConfig};
use crate::store::{
    metadata_json_path, open_index_connection, read_index, read_metadata_json, VectorStore,
    INDEX_DB_FILE,
};

pub use handle::EngineCell;
pub use icd::IcdNormalizer;

use rules::RuleEngine;

/// Where the engine gets its corpus from.
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// Persisted protocol index directory built by the `index` command.
    Index(PathBuf),
    /// Directory of `{gt, text}` evaluation cases, embedded at load time.
    EvaluationDir(PathBuf),
}

impl CorpusSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Index(path) => format!("index:{}", path.display()),
            Self::EvaluationDir(path) => format!("evaluation:{}", path.display()),
        }
    }
}

/// Outcome of one diagnose call.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnoses {
    /// Retrieval was bypassed by the stroke override.
    Emergency(Vec<Candidate>),
    Ranked(Vec<Candidate>),
    /// Nothing is indexed.
    EmptyCorpus,
}

impl Diagnoses {
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Emergency(candidates) | Self::Ranked(candidates) => candidates,
            Self::EmptyCorpus => &[],
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Emergency(_) => "emergency",
            Self::Ranked(_) => "ok",
            Self::EmptyCorpus => "empty_corpus",
        }
    }
}

/// Immutable corpus + embeddings + rule tables. Built once, then shared
/// read-only across requests.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    embedder: LocalEmbedder,
    keywords: KeywordExtractor,
    codes: IcdNormalizer,
    rules: RuleEngine,
    units: Vec<IndexUnit>,
    store: VectorStore,
}

impl Engine {
    pub fn from_parts(
        config: EngineConfig,
        model: SemanticModelConfig,
        keywords: KeywordExtractor,
        units: Vec<IndexUnit>,
        store: VectorStore,
    ) -> Result<Self> {
        config.validate()?;
        if units.len() != store.len() {
            bail!(
                "unit metadata ({}) and vector store ({}) are misaligned",
                units.len(),
                store.len()
            );
        }
        if store.dimensions() != model.dimensions {
            bail!(
                "vector store dimension {} does not match model dimension {}",
                store.dimensions(),
                model.dimensions
            );
        }

        let codes = IcdNormalizer::new()?;
        let rules = RuleEngine::new(codes.clone(), &config);

        Ok(Self {
            config,
            embedder: LocalEmbedder::new(model),
            keywords,
            codes,
            rules,
            units,
            store,
        })
    }

    /// Windows and embeds chunks in memory.
    pub fn from_chunks(
        config: EngineConfig,
        model: SemanticModelConfig,
        chunks: &[Chunk],
    ) -> Result<Self> {
        let keywords = KeywordExtractor::new()?;
        let embedder = LocalEmbedder::new(model.clone());
        let units = build_index_units(chunks, &config, &keywords);

        let mut store = VectorStore::new(model.dimensions);
        store.add(embedder.embed_batch(units.iter().map(|unit| unit.text.as_str())))?;

        Self::from_parts(config, model, keywords, units, store)
    }

    pub fn from_index_dir(config: EngineConfig, index_dir: &Path) -> Result<Self> {
        let db_path = index_dir.join(INDEX_DB_FILE);
        if !db_path.exists() {
            bail!(
                "index database not found at {}; run the index command first",
                db_path.display()
            );
        }

        let keywords = KeywordExtractor::new()?;
        let connection = open_index_connection(&db_path, true)?;
        let loaded = read_index(&connection, &keywords, config.text_preview_chars)?;

        let metadata_path = metadata_json_path(index_dir);
        if metadata_path.exists() {
            let metadata = read_metadata_json(&metadata_path)?;
            let aligned = metadata.len() == loaded.units.len()
                && metadata
                    .iter()
                    .zip(&loaded.units)
                    .all(|(entry, unit)| {
                        entry.protocol_id == unit.metadata.protocol_id
                            && entry.icd10_code == unit.metadata.icd10_code
                    });
            if !aligned {
                bail!(
                    "{} is not aligned with {}; rebuild the index",
                    metadata_path.display(),
                    db_path.display()
                );
            }
        } else {
            warn!(path = %metadata_path.display(), "parallel metadata file missing");
        }

        info!(
            path = %db_path.display(),
            units = loaded.units.len(),
            model_id = %loaded.model.model_id,
            built_at = %loaded.built_at.as_deref().unwrap_or_default(),
            "loaded persisted index"
        );

        Self::from_parts(config, loaded.model, keywords, loaded.units, loaded.store)
    }

    pub fn from_evaluation_dir(
        config: EngineConfig,
        model: SemanticModelConfig,
        dir: &Path,
    ) -> Result<Self> {
        let cases = load_evaluation_cases(dir)
            .with_context(|| format!("refusing to serve from evaluation corpus {}", dir.display()))?;
        let keywords = KeywordExtractor::new()?;
        let chunks = evaluation_chunks(&cases, &keywords);
        Self::from_chunks(config, model, &chunks)
    }

    pub fn load(
        source: &CorpusSource,
        config: EngineConfig,
        model: SemanticModelConfig,
    ) -> Result<Self> {
        match source {
            CorpusSource::Index(dir) => Self::from_index_dir(config, dir),
            CorpusSource::EvaluationDir(dir) => Self::from_evaluation_dir(config, model, dir),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &SemanticModelConfig {
        self.embedder.config()
    }

    pub fn codes(&self) -> &IcdNormalizer {
        &self.codes
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Full decision pipeline for one query.
    pub fn diagnose(&self, query: &str, top_k: usize) -> Diagnoses {
        if let Some(emergency) = self.rules.emergency_override(query) {
            info!("emergency override triggered");
            return Diagnoses::Emergency(self.rules.finalize(emergency, top_k));
        }

        if self.is_empty() {
            warn!("corpus is empty; returning no diagnoses");
            return Diagnoses::EmptyCorpus;
        }

        let retrieved = self.retrieve(query, top_k);
        Diagnoses::Ranked(self.rules.build_diagnoses(query, &retrieved, top_k))
    }
}

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::IndexArgs;
use crate::commands::default_index_dir;
use crate::config::EngineConfig;
use crate::corpus::{build_chunks, build_index_units, load_protocol_records};
use crate::engine::IcdNormalizer;
use crate::keywords::KeywordExtractor;
use crate::model::{IndexCounts, IndexPaths, IndexRunManifest};
use crate::semantic::{resolve_model_config, LocalEmbedder, SemanticModelConfig};
use crate::store::{
    metadata_json_path, open_index_connection, write_index, write_metadata_json, VectorStore,
    INDEX_DB_FILE, INDEX_SCHEMA_VERSION,
};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

pub fn run(args: IndexArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("index-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let index_dir = args
        .index_dir
        .clone()
        .unwrap_or_else(|| default_index_dir(&cache_root));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("index_run_{}.json", utc_compact_string(started_ts)))
    });

    let config = EngineConfig::load(args.engine_config.as_deref())?;
    let model = resolve_model_config(&args.model_id);

    info!(
        protocols = %args.protocols.display(),
        index_dir = %index_dir.display(),
        run_id = %run_id,
        model_id = %model.model_id,
        "starting index build"
    );

    let corpus_sha256 = sha256_file(&args.protocols)?;
    let counts = build_index(&args.protocols, &index_dir, &config, &model)?;

    let manifest = IndexRunManifest {
        manifest_version: 1,
        run_id,
        index_schema_version: INDEX_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        completed_at: now_utc_string(),
        command: render_index_command(&args),
        model,
        engine: config,
        paths: IndexPaths {
            cache_root: cache_root.display().to_string(),
            protocols_path: args.protocols.display().to_string(),
            index_dir: index_dir.display().to_string(),
            db_path: index_dir.join(INDEX_DB_FILE).display().to_string(),
            metadata_path: metadata_json_path(&index_dir).display().to_string(),
        },
        counts,
        corpus_sha256,
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        manifest = %manifest_path.display(),
        records = manifest.counts.records,
        chunks = manifest.counts.chunks,
        units = manifest.counts.units,
        distinct_codes = manifest.counts.distinct_codes,
        "index build completed"
    );

    Ok(())
}

/// Loads, chunks, windows and embeds the protocol corpus, then replaces the
/// index artifact and its parallel `metadata.json`.
pub fn build_index(
    protocols_path: &Path,
    index_dir: &Path,
    config: &EngineConfig,
    model: &SemanticModelConfig,
) -> Result<IndexCounts> {
    ensure_directory(index_dir)?;

    let keywords = KeywordExtractor::new()?;
    let records = load_protocol_records(protocols_path)?;
    let chunks = build_chunks(&records, &keywords);
    let units = build_index_units(&chunks, config, &keywords);

    let embedder = LocalEmbedder::new(model.clone());
    let mut store = VectorStore::new(model.dimensions);
    store
        .add(embedder.embed_batch(units.iter().map(|unit| unit.text.as_str())))
        .context("failed to add embeddings to vector store")?;

    let db_path = index_dir.join(INDEX_DB_FILE);
    let mut connection = open_index_connection(&db_path, false)?;
    write_index(&mut connection, model, &units, &store)
        .with_context(|| format!("failed to write index {}", db_path.display()))?;
    write_metadata_json(&metadata_json_path(index_dir), &units)?;

    let codes = IcdNormalizer::new()?;
    let distinct_codes = chunks
        .iter()
        .map(|chunk| codes.canonical(&chunk.icd10_code))
        .filter(|code| !code.is_empty())
        .collect::<HashSet<String>>()
        .len();
    let codeless_chunks = chunks
        .iter()
        .filter(|chunk| chunk.icd10_code.trim().is_empty())
        .count();

    if units.is_empty() {
        warn!(
            path = %protocols_path.display(),
            "protocol corpus produced no index units; the engine will report an empty corpus"
        );
    }

    Ok(IndexCounts {
        records: records.len(),
        chunks: chunks.len(),
        codeless_chunks,
        units: units.len(),
        distinct_codes,
    })
}

fn render_index_command(args: &IndexArgs) -> String {
    let mut command = vec![
        "qazdx".to_string(),
        "index".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--protocols".to_string(),
        args.protocols.display().to_string(),
        "--model-id".to_string(),
        args.model_id.clone(),
    ];

    if let Some(path) = &args.index_dir {
        command.push("--index-dir".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.manifest_path {
        command.push("--manifest-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.engine_config {
        command.push("--engine-config".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::engine::{Diagnoses, Engine};
    use crate::store::read_metadata_json;

    const CORPUS: &str = concat!(
        r#"{"protocol_id": "p-app", "source_file": "appendicitis.pdf", "title": "Острый аппендицит", "text": "Боль в правой нижней части живота, тошнота, рвота, лихорадка.", "icd_codes": ["K35.8", "K35.2"]}"#,
        "\n",
        "not json at all\n",
        "\n",
        r#"{"protocol_id": "p-org", "source_file": "org.pdf", "title": "Организация помощи", "text": "Маршрутизация пациентов в приемном отделении.", "icd_codes": []}"#,
        "\n",
        r#"{"protocol_id": 17, "source_file": "broken.pdf", "text": "числовой идентификатор"}"#,
        "\n",
    );

    fn write_corpus(dir: &Path, contents: &str) -> std::path::PathBuf {
        let path = dir.join("protocols.jsonl");
        fs::write(&path, contents).expect("write corpus");
        path
    }

    #[test]
    fn builds_loadable_index_with_parallel_metadata() {
        let temp = tempdir().expect("tempdir");
        let protocols = write_corpus(temp.path(), CORPUS);
        let index_dir = temp.path().join("index");

        let counts = build_index(
            &protocols,
            &index_dir,
            &EngineConfig::default(),
            &resolve_model_config(""),
        )
        .expect("index builds");

        assert_eq!(counts.records, 2);
        assert_eq!(counts.chunks, 3);
        assert_eq!(counts.codeless_chunks, 1);
        assert_eq!(counts.units, 3);
        assert_eq!(counts.distinct_codes, 2);

        let metadata = read_metadata_json(&metadata_json_path(&index_dir)).expect("metadata");
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata[0].icd10_code, "K35.8");
        assert_eq!(metadata[1].icd10_code, "K35.2");
        assert_eq!(metadata[2].icd10_code, "");

        let engine =
            Engine::from_index_dir(EngineConfig::default(), &index_dir).expect("engine loads");
        assert_eq!(engine.unit_count(), 3);

        let outcome = engine.diagnose("боль в правой нижней части живота, тошнота", 3);
        assert_eq!(outcome.status(), "ok");
        assert!(outcome.candidates()[0].icd10_code.starts_with("K35"));
    }

    #[test]
    fn rebuild_replaces_previous_index() {
        let temp = tempdir().expect("tempdir");
        let index_dir = temp.path().join("index");
        let model = resolve_model_config("");

        let protocols = write_corpus(temp.path(), CORPUS);
        build_index(&protocols, &index_dir, &EngineConfig::default(), &model)
            .expect("first build");

        let protocols = write_corpus(temp.path(), "");
        let counts = build_index(&protocols, &index_dir, &EngineConfig::default(), &model)
            .expect("second build");
        assert_eq!(counts.units, 0);

        let engine =
            Engine::from_index_dir(EngineConfig::default(), &index_dir).expect("engine loads");
        assert!(engine.is_empty());
        assert_eq!(engine.diagnose("кашель", 3), Diagnoses::EmptyCorpus);
    }

    #[test]
    fn loading_requires_built_index() {
        let temp = tempdir().expect("tempdir");
        let err = Engine::from_index_dir(EngineConfig::default(), temp.path())
            .expect_err("missing index is an error");
        assert!(err.to_string().contains("run the index command first"));
    }

    #[test]
    fn misaligned_metadata_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let protocols = write_corpus(temp.path(), CORPUS);
        let index_dir = temp.path().join("index");
        build_index(
            &protocols,
            &index_dir,
            &EngineConfig::default(),
            &resolve_model_config(""),
        )
        .expect("index builds");

        fs::write(metadata_json_path(&index_dir), "[]").expect("overwrite metadata");
        let err = Engine::from_index_dir(EngineConfig::default(), &index_dir)
            .expect_err("misaligned metadata is an error");
        assert!(err.to_string().contains("rebuild the index"));
    }

    #[test]
    fn renders_reproducible_command() {
        let args = IndexArgs {
            cache_root: ".cache/qazdx".into(),
            protocols: "data/protocols.jsonl".into(),
            index_dir: None,
            manifest_path: None,
            engine_config: Some("engine.json".into()),
            model_id: "qazdx-hash-ru-v1".to_string(),
        };
        assert_eq!(
            render_index_command(&args),
            "qazdx index --cache-root .cache/qazdx --protocols data/protocols.jsonl \
             --model-id qazdx-hash-ru-v1 --engine-config engine.json"
        );
    }
}

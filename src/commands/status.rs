use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::default_index_dir;
use crate::model::IndexRunManifest;
use crate::store::{
    metadata_json_path, open_index_connection, read_index_summary, read_metadata_json,
    INDEX_DB_FILE,
};

pub fn run(args: StatusArgs) -> Result<()> {
    let index_dir = args
        .index_dir
        .clone()
        .unwrap_or_else(|| default_index_dir(&args.cache_root));
    let db_path = index_dir.join(INDEX_DB_FILE);
    let metadata_path = metadata_json_path(&index_dir);
    let manifest_dir = args.cache_root.join("manifests");

    info!(
        cache_root = %args.cache_root.display(),
        index_dir = %index_dir.display(),
        "status requested"
    );

    if db_path.exists() {
        let connection = open_index_connection(&db_path, true)?;
        let summary = read_index_summary(&connection)
            .with_context(|| format!("failed to read {}", db_path.display()))?;
        let model = summary.model.unwrap_or_default();

        info!(
            path = %db_path.display(),
            schema_version = %summary.schema_version.unwrap_or_default(),
            units = summary.unit_count,
            model_id = %model.model_id,
            dimensions = model.dimensions,
            built_at = %summary.built_at.unwrap_or_default(),
            "index status"
        );
    } else {
        warn!(path = %db_path.display(), "index database missing");
    }

    if metadata_path.exists() {
        let metadata = read_metadata_json(&metadata_path)?;
        info!(
            path = %metadata_path.display(),
            entries = metadata.len(),
            "parallel metadata present"
        );
    } else {
        warn!(path = %metadata_path.display(), "parallel metadata missing");
    }

    match latest_manifest(&manifest_dir)? {
        Some(manifest) => info!(
            run_id = %manifest.run_id,
            status = %manifest.status,
            completed_at = %manifest.completed_at,
            records = manifest.counts.records,
            units = manifest.counts.units,
            corpus_sha256 = %manifest.corpus_sha256,
            "latest index run"
        ),
        None => warn!(path = %manifest_dir.display(), "no index run manifest found"),
    }

    Ok(())
}

/// Manifest names embed a compact UTC timestamp, so the lexically greatest
/// name is the latest run.
fn latest_manifest(manifest_dir: &Path) -> Result<Option<IndexRunManifest>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut latest = None;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("index_run_") && name.ends_with(".json"));
        if is_run_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }

    let Some(path) = latest else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest = serde_json::from_slice::<IndexRunManifest>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{IndexCounts, IndexPaths};
    use crate::semantic::resolve_model_config;
    use crate::util::write_json_pretty;

    fn manifest(run_id: &str) -> IndexRunManifest {
        IndexRunManifest {
            manifest_version: 1,
            run_id: run_id.to_string(),
            index_schema_version: "1.0.0".to_string(),
            status: "completed".to_string(),
            started_at: String::new(),
            completed_at: String::new(),
            command: String::new(),
            model: resolve_model_config(""),
            engine: EngineConfig::default(),
            paths: IndexPaths {
                cache_root: String::new(),
                protocols_path: String::new(),
                index_dir: String::new(),
                db_path: String::new(),
                metadata_path: String::new(),
            },
            counts: IndexCounts::default(),
            corpus_sha256: String::new(),
        }
    }

    #[test]
    fn picks_latest_run_manifest_by_name() {
        let temp = tempdir().expect("tempdir");
        write_json_pretty(
            &temp.path().join("index_run_20250101T000000Z.json"),
            &manifest("old"),
        )
        .expect("write old");
        write_json_pretty(
            &temp.path().join("index_run_20250301T000000Z.json"),
            &manifest("new"),
        )
        .expect("write new");
        fs::write(temp.path().join("unrelated.json"), "{}").expect("write unrelated");

        let latest = latest_manifest(temp.path())
            .expect("manifests readable")
            .expect("manifest found");
        assert_eq!(latest.run_id, "new");
    }

    #[test]
    fn missing_directory_has_no_manifest() {
        let temp = tempdir().expect("tempdir");
        assert!(latest_manifest(&temp.path().join("absent"))
            .expect("no error")
            .is_none());
    }

    #[test]
    fn status_tolerates_empty_cache_root() {
        let temp = tempdir().expect("tempdir");
        run(StatusArgs {
            cache_root: temp.path().to_path_buf(),
            index_dir: None,
        })
        .expect("status succeeds without artifacts");
    }
}

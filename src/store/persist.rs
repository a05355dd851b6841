use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::keywords::KeywordExtractor;
use crate::model::{IndexUnit, UnitMetadata};
use crate::semantic::{decode_embedding_blob, encode_embedding_blob, SemanticModelConfig};
use crate::util::{char_prefix, now_utc_string, write_json_pretty};

use super::VectorStore;

pub const INDEX_SCHEMA_VERSION: &str = "1.0.0";
pub const INDEX_DB_FILE: &str = "qazdx_index.sqlite";
const METADATA_JSON_FILE: &str = "metadata.json";

/// Everything needed to answer queries, read back from the index artifact.
#[derive(Debug)]
pub struct LoadedIndex {
    pub model: SemanticModelConfig,
    pub built_at: Option<String>,
    pub units: Vec<IndexUnit>,
    pub store: VectorStore,
}

pub fn metadata_json_path(index_dir: &Path) -> PathBuf {
    index_dir.join(METADATA_JSON_FILE)
}

pub fn open_index_connection(db_path: &Path, read_only: bool) -> Result<Connection> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };

    let connection = Connection::open_with_flags(db_path, flags)
        .with_context(|| format!("failed to open index database: {}", db_path.display()))?;

    if !read_only {
        configure_connection(&connection)?;
    }

    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS index_meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS index_units (
          position INTEGER PRIMARY KEY,
          protocol_id TEXT NOT NULL,
          icd10_code TEXT NOT NULL,
          diagnosis TEXT NOT NULL,
          source_file TEXT NOT NULL,
          text TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_index_units_code ON index_units(icd10_code);
        ",
    )?;
    Ok(())
}

/// Replaces the whole index in one transaction. There are no incremental
/// updates: a rebuild always rewrites every position.
pub fn write_index(
    connection: &mut Connection,
    model: &SemanticModelConfig,
    units: &[IndexUnit],
    store: &VectorStore,
) -> Result<()> {
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

    ensure_schema(connection)?;
    let model_json =
        serde_json::to_string(model).context("failed to serialize embedding model config")?;

    let tx = connection.transaction()?;
    tx.execute("DELETE FROM index_units", [])?;
    tx.execute("DELETE FROM index_meta", [])?;

    {
        let mut meta_statement =
            tx.prepare("INSERT INTO index_meta(key, value) VALUES(?1, ?2)")?;
        meta_statement.execute(params!["schema_version", INDEX_SCHEMA_VERSION])?;
        meta_statement.execute(params!["model_config", model_json])?;
        meta_statement.execute(params!["built_at", now_utc_string()])?;
        meta_statement.execute(params!["unit_count", units.len().to_string()])?;

        let mut unit_statement = tx.prepare(
            "
            INSERT INTO index_units(
              position, protocol_id, icd10_code, diagnosis, source_file, text, embedding, embedding_dim
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )?;

        for (position, unit) in units.iter().enumerate() {
            let Some(vector) = store.vector(position) else {
                bail!("vector store has no entry at position {position}");
            };
            unit_statement.execute(params![
                position as i64,
                unit.metadata.protocol_id,
                unit.metadata.icd10_code,
                unit.metadata.diagnosis,
                unit.metadata.source_file,
                unit.text,
                encode_embedding_blob(vector),
                vector.len() as i64,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

pub fn read_index(
    connection: &Connection,
    keywords: &KeywordExtractor,
    preview_chars: usize,
) -> Result<LoadedIndex> {
    let schema_version = read_meta(connection, "schema_version")?
        .context("index is missing schema_version; rebuild it with the index command")?;
    if schema_version != INDEX_SCHEMA_VERSION {
        bail!(
            "index schema {schema_version} is not supported (expected {INDEX_SCHEMA_VERSION})"
        );
    }

    let model_json = read_meta(connection, "model_config")?
        .context("index is missing model_config")?;
    let model: SemanticModelConfig =
        serde_json::from_str(&model_json).context("failed to parse index model_config")?;
    let built_at = read_meta(connection, "built_at")?;

    let mut statement = connection.prepare(
        "
        SELECT position, protocol_id, icd10_code, diagnosis, source_file, text, embedding, embedding_dim
        FROM index_units
        ORDER BY position ASC
        ",
    )?;
    let mut rows = statement.query([])?;

    let mut units = Vec::<IndexUnit>::new();
    let mut vectors = Vec::<Vec<f32>>::new();
    while let Some(row) = rows.next()? {
        let position = row.get::<_, i64>(0)?;
        if position != units.len() as i64 {
            bail!(
                "index positions are not contiguous: expected {}, found {position}",
                units.len()
            );
        }

        let embedding_dim = row.get::<_, i64>(7)? as usize;
        let blob = row.get::<_, Vec<u8>>(6)?;
        let Some(vector) = decode_embedding_blob(&blob, model.dimensions)
            .filter(|_| embedding_dim == model.dimensions)
        else {
            bail!(
                "embedding at position {position} has dimension {embedding_dim}, model expects {}",
                model.dimensions
            );
        };

        let text = row.get::<_, String>(5)?;
        units.push(IndexUnit {
            metadata: UnitMetadata {
                protocol_id: row.get(1)?,
                icd10_code: row.get(2)?,
                diagnosis: row.get(3)?,
                source_file: row.get(4)?,
                text_preview: char_prefix(&text, preview_chars),
            },
            keywords: keywords.extract(&text),
            text,
        });
        vectors.push(vector);
    }

    let mut store = VectorStore::new(model.dimensions);
    store.add(vectors)?;

    Ok(LoadedIndex {
        model,
        built_at,
        units,
        store,
    })
}

/// Header fields of an index artifact, read without loading any vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSummary {
    pub schema_version: Option<String>,
    pub model: Option<SemanticModelConfig>,
    pub built_at: Option<String>,
    pub unit_count: usize,
}

pub fn read_index_summary(connection: &Connection) -> Result<IndexSummary> {
    let model = read_meta(connection, "model_config")?
        .map(|raw| serde_json::from_str::<SemanticModelConfig>(&raw))
        .transpose()
        .context("failed to parse index model_config")?;
    let unit_count = connection
        .query_row("SELECT COUNT(*) FROM index_units", [], |row| row.get::<_, i64>(0))
        .context("failed to count index units")?;

    Ok(IndexSummary {
        schema_version: read_meta(connection, "schema_version")?,
        model,
        built_at: read_meta(connection, "built_at")?,
        unit_count: usize::try_from(unit_count).unwrap_or_default(),
    })
}

fn read_meta(connection: &Connection, key: &str) -> Result<Option<String>> {
    let value = connection
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .with_context(|| format!("failed to read index metadata key '{key}'"))?;
    Ok(value)
}

pub fn write_metadata_json(path: &Path, units: &[IndexUnit]) -> Result<()> {
    let metadata = units
        .iter()
        .map(|unit| &unit.metadata)
        .collect::<Vec<&UnitMetadata>>();
    write_json_pretty(path, &metadata)
}

pub fn read_metadata_json(path: &Path) -> Result<Vec<UnitMetadata>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

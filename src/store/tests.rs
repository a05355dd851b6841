use std::collections::HashSet;

use rusqlite::Connection;

use super::*;
use crate::keywords::KeywordExtractor;
use crate::model::{IndexUnit, UnitMetadata};
use crate::semantic::{embed_text_local, resolve_model_config, SemanticModelConfig};

fn small_model() -> SemanticModelConfig {
    SemanticModelConfig {
        dimensions: 32,
        ..resolve_model_config("")
    }
}

fn unit(protocol_id: &str, code: &str, text: &str) -> IndexUnit {
    IndexUnit {
        metadata: UnitMetadata {
            protocol_id: protocol_id.to_string(),
            icd10_code: code.to_string(),
            diagnosis: format!("Протокол {protocol_id}"),
            source_file: format!("{protocol_id}.pdf"),
            text_preview: text.to_string(),
        },
        text: text.to_string(),
        keywords: HashSet::new(),
    }
}

#[test]
fn add_rejects_batches_with_wrong_dimension() {
    let mut store = VectorStore::new(4);
    store
        .add(vec![vec![1.0, 0.0, 0.0, 0.0]])
        .expect("matching dimension is accepted");
    let err = store
        .add(vec![vec![0.0, 1.0, 0.0, 0.0], vec![1.0, 0.0]])
        .expect_err("short vector is rejected");
    assert!(err.to_string().contains("dimension 2"));
    assert_eq!(store.len(), 1);
}

#[test]
fn similarity_returns_one_score_per_position_in_order() {
    let mut store = VectorStore::new(2);
    store
        .add(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]])
        .expect("vectors are accepted");

    let scores = store.similarity(&[1.0, 0.0]);
    assert_eq!(
        scores.iter().map(|(position, _)| *position).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!((scores[0].1 - 1.0).abs() < 1e-9);
    assert!(scores[1].1.abs() < 1e-9);
    assert!((scores[2].1 - 0.6).abs() < 1e-6);
}

#[test]
fn index_roundtrip_is_bit_identical_and_position_aligned() {
    let model = small_model();
    let units = vec![
        unit("p1", "K35", "боль в правой подвздошной области"),
        unit("p2", "J18", "кашель с мокротой и лихорадка"),
        unit("p3", "", "общие положения без кода"),
    ];
    let mut store = VectorStore::new(model.dimensions);
    store
        .add(
            units
                .iter()
                .map(|unit| embed_text_local(&unit.text, model.dimensions))
                .collect(),
        )
        .expect("vectors are accepted");

    let mut connection = Connection::open_in_memory().expect("in-memory DB should open");
    write_index(&mut connection, &model, &units, &store).expect("index is written");

    let keywords = KeywordExtractor::new().expect("keyword regex should compile");
    let loaded = read_index(&connection, &keywords, 300).expect("index is read");

    assert_eq!(loaded.model, model);
    assert!(loaded.built_at.is_some());
    assert_eq!(loaded.units.len(), 3);
    for (position, unit) in units.iter().enumerate() {
        assert_eq!(loaded.units[position].metadata, unit.metadata);
        let original = store.vector(position).expect("original vector");
        let reloaded = loaded.store.vector(position).expect("reloaded vector");
        assert_eq!(
            original.iter().map(|value| value.to_bits()).collect::<Vec<_>>(),
            reloaded.iter().map(|value| value.to_bits()).collect::<Vec<_>>()
        );
    }
    assert!(loaded.units[1].keywords.contains("кашель"));
}

#[test]
fn rebuild_replaces_previous_contents() {
    let model = small_model();
    let mut connection = Connection::open_in_memory().expect("in-memory DB should open");

    for texts in [vec!["первый", "второй"], vec!["третий"]] {
        let units = texts
            .iter()
            .enumerate()
            .map(|(index, text)| unit(&format!("p{index}"), "R53", text))
            .collect::<Vec<_>>();
        let mut store = VectorStore::new(model.dimensions);
        store
            .add(
                units
                    .iter()
                    .map(|unit| embed_text_local(&unit.text, model.dimensions))
                    .collect(),
            )
            .expect("vectors are accepted");
        write_index(&mut connection, &model, &units, &store).expect("index is written");
    }

    let keywords = KeywordExtractor::new().expect("keyword regex should compile");
    let loaded = read_index(&connection, &keywords, 300).expect("index is read");
    assert_eq!(loaded.units.len(), 1);
    assert_eq!(loaded.units[0].text, "третий");
}

#[test]
fn write_index_rejects_misaligned_metadata() {
    let model = small_model();
    let units = vec![unit("p1", "K35", "текст")];
    let store = VectorStore::new(model.dimensions);
    let mut connection = Connection::open_in_memory().expect("in-memory DB should open");
    assert!(write_index(&mut connection, &model, &units, &store).is_err());
}

#[test]
fn metadata_json_roundtrip_preserves_order() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = metadata_json_path(dir.path());
    let units = vec![unit("p1", "K35", "а"), unit("p2", "J18", "б")];
    write_metadata_json(&path, &units).expect("metadata is written");

    let metadata = read_metadata_json(&path).expect("metadata is read");
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata[0].protocol_id, "p1");
    assert_eq!(metadata[1].icd10_code, "J18");
}

#[test]
fn summary_reads_header_without_vectors() {
    let model = small_model();
    let units = vec![unit("p1", "K35", "боль"), unit("p2", "J18", "кашель")];
    let mut store = VectorStore::new(model.dimensions);
    store
        .add(
            units
                .iter()
                .map(|unit| embed_text_local(&unit.text, model.dimensions))
                .collect(),
        )
        .expect("vectors are accepted");

    let mut connection = Connection::open_in_memory().expect("in-memory DB should open");
    write_index(&mut connection, &model, &units, &store).expect("index is written");

    let summary = read_index_summary(&connection).expect("summary is read");
    assert_eq!(summary.schema_version.as_deref(), Some(INDEX_SCHEMA_VERSION));
    assert_eq!(summary.model, Some(model));
    assert_eq!(summary.unit_count, 2);
    assert!(summary.built_at.is_some());
}

mod persist;
#[cfg(test)]
mod tests;

use anyhow::{bail, Result};

use crate::semantic::cosine_similarity;

pub use persist::{
    metadata_json_path, open_index_connection, read_index, read_index_summary,
    read_metadata_json, write_index, write_metadata_json, INDEX_DB_FILE, INDEX_SCHEMA_VERSION,
};

/// Flat in-memory vector store. Positions are stable for the lifetime of the
/// store and line up with the parallel unit metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    /// Appends vectors; the whole batch is rejected if any dimension differs.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        if let Some((offset, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != self.dimensions)
        {
            bail!(
                "vector at batch offset {offset} has dimension {}, store expects {}",
                vector.len(),
                self.dimensions
            );
        }

        self.vectors.extend(vectors);
        Ok(())
    }

    /// Cosine similarity of `query` against every stored vector, in position
    /// order. Stored vectors are L2-normalized, so this is a dot product.
    pub fn similarity(&self, query: &[f32]) -> Vec<(usize, f64)> {
        self.vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, cosine_similarity(query, vector)))
            .collect()
    }
}

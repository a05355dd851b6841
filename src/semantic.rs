use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_ID: &str = "qazdx-hash-ru-v1";
pub const DEFAULT_MODEL_NAME: &str = "local-hashed-multilingual";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-sha256-hash-v1";

const STEM_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

impl Default for SemanticModelConfig {
    fn default() -> Self {
        resolve_model_config(DEFAULT_MODEL_ID)
    }
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    let model_name = if resolved_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

/// Embeds text with the same normalization for corpus windows and queries.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    config: SemanticModelConfig,
}

impl LocalEmbedder {
    pub fn new(config: SemanticModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SemanticModelConfig {
        &self.config
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        embed_text_local(text, self.config.dimensions)
    }

    pub fn embed_batch<'a, I>(&self, texts: I) -> Vec<Vec<f32>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(|text| self.embed(text)).collect()
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash % dims as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let out = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<f32>>();

    (out.len() == expected_dim).then_some(out)
}

// SHA-256 rather than DefaultHasher: persisted vectors must not depend on the
// toolchain that built the index.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 3);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        // Russian inflection: "живот" and "живота" share a stem feature.
        if word.chars().count() > STEM_CHARS {
            let stem = word.chars().take(STEM_CHARS).collect::<String>();
            features.push(format!("s:{stem}"));
        }
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_unit_length_for_cyrillic_text() {
        let vector = embed_text_local("боль в правой нижней части живота", DEFAULT_EMBEDDING_DIM);
        let norm = vector
            .iter()
            .map(|value| f64::from(*value) * f64::from(*value))
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn empty_payload_embeds_to_zero_vector() {
        let vector = embed_text_local("  ,.; ", 16);
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn identical_text_has_cosine_one_and_related_text_scores_higher() {
        let anchor = embed_text_local("кашель мокрота температура", 384);
        let same = embed_text_local("Кашель, мокрота, температура", 384);
        let related = embed_text_local("сильный кашель с мокротой", 384);
        let unrelated = embed_text_local("перелом лучевой кости", 384);

        assert!((cosine_similarity(&anchor, &same) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&anchor, &related) > cosine_similarity(&anchor, &unrelated));
    }

    #[test]
    fn embedding_blob_roundtrip_is_bit_exact() {
        let vector = embed_text_local("острый аппендицит", 32);
        let blob = encode_embedding_blob(&vector);
        let decoded = decode_embedding_blob(&blob, 32).expect("blob should decode");
        assert_eq!(
            vector.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            decoded.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
        assert!(decode_embedding_blob(&blob, 31).is_none());
    }

    #[test]
    fn resolve_model_config_falls_back_to_default_for_blank_id() {
        let config = resolve_model_config("  ");
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.dimensions, DEFAULT_EMBEDDING_DIM);
    }
}

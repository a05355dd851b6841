use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Units taken from the combined semantic + lexical ranking before they are
/// grouped by code.
pub const RAW_CANDIDATE_LIMIT: usize = 20;
/// Added per shared keyword between the query and a corpus window.
pub const LEXICAL_BOOST_UNIT: f64 = 0.1;
/// Added per matching symptom hint in the rule engine.
pub const RULE_BOOST_UNIT: f64 = 0.15;
/// Score given to every contextual fallback diagnosis.
pub const FALLBACK_SCORE: f64 = 0.4;
pub const WINDOW_WORDS: usize = 400;
pub const OVERLAP_WORDS: usize = 100;
pub const TEXT_PREVIEW_CHARS: usize = 300;
pub const DEFAULT_TOP_K: usize = 3;

/// Tunables of the ranking pipeline, overridable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub raw_candidate_limit: usize,
    pub lexical_boost_unit: f64,
    pub rule_boost_unit: f64,
    pub fallback_score: f64,
    pub window_words: usize,
    pub overlap_words: usize,
    pub text_preview_chars: usize,
    pub top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            raw_candidate_limit: RAW_CANDIDATE_LIMIT,
            lexical_boost_unit: LEXICAL_BOOST_UNIT,
            rule_boost_unit: RULE_BOOST_UNIT,
            fallback_score: FALLBACK_SCORE,
            window_words: WINDOW_WORDS,
            overlap_words: OVERLAP_WORDS,
            text_preview_chars: TEXT_PREVIEW_CHARS,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read(path)
                    .with_context(|| format!("failed to read engine config {}", path.display()))?;
                serde_json::from_slice::<EngineConfig>(&raw)
                    .with_context(|| format!("failed to parse engine config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_top_k(mut self, top_k: Option<usize>) -> Result<Self> {
        if let Some(top_k) = top_k {
            self.top_k = top_k;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_words == 0 {
            bail!("window_words must be positive");
        }
        if self.overlap_words >= self.window_words {
            bail!(
                "overlap_words ({}) must be smaller than window_words ({})",
                self.overlap_words,
                self.window_words
            );
        }
        if self.top_k == 0 {
            bail!("top_k must be at least 1");
        }
        if self.raw_candidate_limit == 0 {
            bail!("raw_candidate_limit must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"top_k": 5, "fallback_score": 0.3}"#).expect("config parses");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.fallback_score, 0.3);
        assert_eq!(config.raw_candidate_limit, RAW_CANDIDATE_LIMIT);
        assert_eq!(config.window_words, WINDOW_WORDS);
    }

    #[test]
    fn validate_rejects_overlap_not_smaller_than_window() {
        let config = EngineConfig {
            window_words: 100,
            overlap_words: 100,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn with_top_k_rejects_zero() {
        assert!(EngineConfig::default().with_top_k(Some(0)).is_err());
        let config = EngineConfig::default()
            .with_top_k(None)
            .expect("default config is valid");
        assert_eq!(config.top_k, DEFAULT_TOP_K);
    }
}

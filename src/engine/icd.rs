use anyhow::{Context, Result};
use regex::Regex;

/// The single canonical ICD-10 form used everywhere codes are compared:
/// letter, two digits, optional fractional group (`" k35.80,"` → `K35.80`).
/// Strings without a code-shaped part pass through upper-cased and trimmed.
#[derive(Debug, Clone)]
pub struct IcdNormalizer {
    pattern: Regex,
}

impl IcdNormalizer {
    pub fn new() -> Result<Self> {
        let pattern =
            Regex::new(r"[A-Z]\d{2}(\.\d+)?").context("failed to compile ICD-10 code regex")?;
        Ok(Self { pattern })
    }

    pub fn canonical(&self, code: &str) -> String {
        let upper = code.trim().to_uppercase();
        match self.pattern.find(&upper) {
            Some(found) => found.as_str().to_string(),
            None => upper,
        }
    }

    /// True when `code` is `category` itself or one of its subcodes
    /// (`J18.9` belongs to `J18`).
    pub fn in_category(&self, code: &str, category: &str) -> bool {
        let code = self.canonical(code);
        let category = self.canonical(category);
        code == category
            || code
                .strip_prefix(category.as_str())
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    }
}

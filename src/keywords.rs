use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;

/// Lexical tokens used for overlap scoring: runs of at least four Cyrillic or
/// Latin letters, lower-cased.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    token: Regex,
}

impl KeywordExtractor {
    pub fn new() -> Result<Self> {
        let token = Regex::new(r"[\p{Cyrillic}a-z]{4,}")
            .context("failed to compile keyword regex")?;
        Ok(Self { token })
    }

    pub fn extract(&self, text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        self.token
            .find_iter(&lowered)
            .map(|found| found.as_str().to_string())
            .collect()
    }
}

pub fn overlap_count(left: &HashSet<String>, right: &HashSet<String>) -> usize {
    let (small, large) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    small.iter().filter(|token| large.contains(*token)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> KeywordExtractor {
        KeywordExtractor::new().expect("keyword regex should compile")
    }

    #[test]
    fn extracts_lowercased_cyrillic_and_latin_tokens_of_four_or_more_letters() {
        let keywords = extractor().extract("Боль в ПРАВОЙ нижней части, CRP high, ОРВИ");
        let mut sorted = keywords.into_iter().collect::<Vec<String>>();
        sorted.sort();
        assert_eq!(sorted, vec!["high", "боль", "нижней", "орви", "правой", "части"]);
    }

    #[test]
    fn kazakh_letters_stay_inside_tokens() {
        let keywords = extractor().extract("Іштің ауыруы, құсу");
        let mut sorted = keywords.into_iter().collect::<Vec<String>>();
        sorted.sort();
        assert_eq!(sorted, vec!["ауыруы", "іштің", "құсу"]);
    }

    #[test]
    fn digits_and_short_tokens_are_ignored() {
        let keywords = extractor().extract("t 38.5, АД 140/90, rr");
        assert!(keywords.is_empty());
    }

    #[test]
    fn overlap_count_is_symmetric() {
        let extractor = extractor();
        let query = extractor.extract("кашель и одышка, мокрота");
        let unit = extractor.extract("Пневмония: кашель, мокрота, лихорадка");
        assert_eq!(overlap_count(&query, &unit), 2);
        assert_eq!(overlap_count(&unit, &query), 2);
    }
}

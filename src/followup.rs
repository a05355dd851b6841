//! Clarifying-question generation through a local text-generation endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_SECS: f64 = 25.0;
pub const URL_ENV: &str = "QAZDX_FOLLOWUP_URL";
pub const TIMEOUT_ENV: &str = "QAZDX_FOLLOWUP_TIMEOUT";
pub const DEFAULT_QUESTION_COUNT: usize = 3;

const MAX_TOKENS: u32 = 200;
const TEMPERATURE: f64 = 0.2;

const CANNED_QUESTIONS: &[&str] = &[
    "Когда начались симптомы?",
    "Есть ли температура/давление?",
    "Есть ли ухудшение со временем?",
];

#[derive(Debug, Error)]
pub enum FollowupError {
    #[error("follow-up endpoint is not configured")]
    NotConfigured,

    #[error("follow-up endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("follow-up endpoint returned HTTP {0}")]
    Status(u16),

    #[error("follow-up response is malformed: {0}")]
    MalformedResponse(String),

    #[error("follow-up response carried no questions")]
    EmptyResponse,
}

#[derive(Debug, Clone)]
pub struct FollowupConfig {
    /// Endpoint URL; `None` disables the client.
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl FollowupConfig {
    /// Blank URLs count as unset; non-positive or non-finite timeouts fall
    /// back to the default.
    pub fn new(url: Option<&str>, timeout_secs: f64) -> Self {
        let url = url
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let timeout_secs = if timeout_secs.is_finite() && timeout_secs > 0.0 {
            timeout_secs
        } else {
            DEFAULT_TIMEOUT_SECS
        };

        Self {
            url,
            timeout: Duration::from_secs_f64(timeout_secs),
        }
    }

    /// Command-line values win; unset ones are read from `QAZDX_FOLLOWUP_URL`
    /// and `QAZDX_FOLLOWUP_TIMEOUT`. Unparsable timeouts are ignored.
    pub fn resolve(url: Option<&str>, timeout_secs: Option<f64>) -> Self {
        let env_url = std::env::var(URL_ENV).ok();
        let url = url.or(env_url.as_deref());

        let timeout_secs = timeout_secs
            .or_else(|| {
                std::env::var(TIMEOUT_ENV)
                    .ok()
                    .and_then(|value| value.trim().parse::<f64>().ok())
            })
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(url, timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug)]
pub struct FollowupClient {
    config: FollowupConfig,
    http: Option<reqwest::blocking::Client>,
}

impl FollowupClient {
    pub fn new(config: FollowupConfig) -> Result<Self> {
        let http = if config.is_configured() {
            Some(
                reqwest::blocking::Client::builder()
                    .timeout(config.timeout)
                    .build()
                    .context("failed to build follow-up HTTP client")?,
            )
        } else {
            None
        };

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &FollowupConfig {
        &self.config
    }

    pub fn questions(&self, symptoms: &str, count: usize) -> Result<Vec<String>, FollowupError> {
        let (Some(url), Some(http)) = (self.config.url.as_deref(), self.http.as_ref()) else {
            return Err(FollowupError::NotConfigured);
        };

        let prompt = build_prompt(symptoms, count);
        let request = GenerationRequest {
            prompt: &prompt,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = http
            .post(url)
            .json(&request)
            .send()
            .map_err(|err| FollowupError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FollowupError::Status(status.as_u16()));
        }

        let body = response
            .json::<Value>()
            .map_err(|err| FollowupError::MalformedResponse(err.to_string()))?;
        parse_followup_body(&body, count)
    }

    /// Never fails: an unconfigured client yields no questions, any other
    /// failure yields the canned list.
    pub fn questions_or_fallback(&self, symptoms: &str, count: usize) -> Vec<String> {
        match self.questions(symptoms, count) {
            Ok(questions) => questions,
            Err(FollowupError::NotConfigured) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "using canned follow-up questions");
                canned_questions(count)
            }
        }
    }
}

pub fn build_prompt(symptoms: &str, count: usize) -> String {
    format!(
        "You are a clinical assistant. Given symptoms text, ask {count} short clarifying \
         questions (no diagnosis). Return ONLY a JSON array of strings.\n\nSymptoms: {symptoms}"
    )
}

pub fn canned_questions(count: usize) -> Vec<String> {
    CANNED_QUESTIONS
        .iter()
        .take(count)
        .map(|question| question.to_string())
        .collect()
}

/// Extracts generated text from `{"text": ..}` or `{"choices": [{"text": ..}]}`
/// and reads it as a JSON array of questions, truncated to `count`.
pub fn parse_followup_body(body: &Value, count: usize) -> Result<Vec<String>, FollowupError> {
    let text = body
        .get("text")
        .or_else(|| {
            body.get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("text"))
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or(FollowupError::EmptyResponse)?;

    let parsed = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| embedded_array(text))
        .ok_or_else(|| FollowupError::MalformedResponse("text is not JSON".to_string()))?;

    let Value::Array(items) = parsed else {
        return Err(FollowupError::MalformedResponse(
            "expected a JSON array of strings".to_string(),
        ));
    };

    let questions = items
        .iter()
        .map(|item| match item {
            Value::String(value) => value.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|question| !question.is_empty())
        .take(count)
        .collect::<Vec<String>>();

    if questions.is_empty() {
        return Err(FollowupError::EmptyResponse);
    }
    debug!(questions = questions.len(), "parsed follow-up questions");
    Ok(questions)
}

// Models often wrap the array in prose or code fences.
fn embedded_array(text: &str) -> Option<Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

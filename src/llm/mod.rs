//! Client for the external LLM service used as the attention engine's
//! fallback step.
//!
//! Request shape and response parsing follow the documented contract: a
//! `generate`-style request with `stream: false`, and a response whose
//! `response` field either is or contains a JSON object
//! `{directed, confidence, reason}`. Non-conforming responses fall back to a
//! permissive regex extraction before giving up.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("could not parse response")]
    Unparseable,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Parsed verdict from the LLM: whether the speaker is addressing the
/// listener, a confidence, and a human-readable reason.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmVerdict {
    pub directed: bool,
    pub confidence: f32,
    pub reason: String,
}

pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `prompt` (the transcript plus sliding-window context, already
    /// composed by the caller) and parses the directed/confidence/reason
    /// verdict out of the response.
    pub async fn classify(&self, prompt: String) -> Result<LlmVerdict, LlmError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 100,
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { LlmError::Timeout } else { LlmError::Request(err) })?
            .error_for_status()?
            .json::<GenerateResponse>()
            .await?;

        parse_verdict(&response.response)
    }
}

fn parse_verdict(text: &str) -> Result<LlmVerdict, LlmError> {
    if let Ok(verdict) = serde_json::from_str::<LlmVerdict>(text) {
        return Ok(verdict);
    }
    if let Some(obj) = extract_json_object(text) {
        if let Ok(verdict) = serde_json::from_str::<LlmVerdict>(&obj) {
            return Ok(verdict);
        }
    }
    permissive_extract(text).ok_or(LlmError::Unparseable)
}

/// Finds the first balanced `{...}` substring, for responses that wrap the
/// JSON object in prose.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

static DIRECTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"?directed"?\s*[:=]\s*(true|false)"#).unwrap());
static CONFIDENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"?confidence"?\s*[:=]\s*([0-9]*\.?[0-9]+)"#).unwrap());

/// Best-effort extraction when the response is neither valid JSON nor a
/// balanced embedded object.
fn permissive_extract(text: &str) -> Option<LlmVerdict> {
    let directed = DIRECTED_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .eq_ignore_ascii_case("true");
    let confidence = CONFIDENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or(0.5);
    Some(LlmVerdict {
        directed,
        confidence: confidence.clamp(0.0, 1.0),
        reason: "extracted from non-conforming response".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let verdict = parse_verdict(r#"{"directed":true,"confidence":0.9,"reason":"question"}"#).unwrap();
        assert!(verdict.directed);
        assert!((verdict.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let verdict = parse_verdict("Sure, here you go: {\"directed\": false, \"confidence\": 0.2, \"reason\": \"chit chat\"} thanks!").unwrap();
        assert!(!verdict.directed);
    }

    #[test]
    fn falls_back_to_regex_extraction() {
        let verdict = parse_verdict("directed=true, confidence=0.77").unwrap();
        assert!(verdict.directed);
        assert!((verdict.confidence - 0.77).abs() < 1e-6);
    }

    #[test]
    fn unparseable_text_is_an_error() {
        let result = parse_verdict("no useful signal here");
        assert!(matches!(result, Err(LlmError::Unparseable)));
    }
}

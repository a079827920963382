use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::summary::chunker::estimate_tokens;

// Code fences some instruction-tuned models wrap their JSON in.
static FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap());

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request timed out")]
    Timeout,

    /// The backend rejected the request outright (4xx). Not retryable.
    #[error("inference backend rejected the request (status {status})")]
    InvalidResponse { status: u16 },

    /// 5xx or connection-level failure; the caller may retry.
    #[error("transient inference failure: {0}")]
    Transient(String),

    #[error("prompt of {tokens} estimated tokens exceeds the cap of {limit}")]
    PromptTooLarge { tokens: usize, limit: usize },
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient(_))
    }
}

/// External LLM inference backend, exchangeable so tests can stub completions
/// and failure sequences.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Returns the raw completion text verbatim; parsing is the caller's
    /// concern.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[&str],
    ) -> Result<String, InferenceError>;

    async fn health(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    stop: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

pub struct HttpInferenceClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    chars_per_token: usize,
    max_prompt_tokens: usize,
}

impl HttpInferenceClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.inference_url(),
            api_key: config.inference_api_key.clone(),
            timeout: config.inference_timeout(),
            chars_per_token: config.chars_per_token,
            max_prompt_tokens: config.max_prompt_tokens,
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[&str],
    ) -> Result<String, InferenceError> {
        let estimated = estimate_tokens(prompt, self.chars_per_token);
        if estimated > self.max_prompt_tokens {
            return Err(InferenceError::PromptTooLarge {
                tokens: estimated,
                limit: self.max_prompt_tokens,
            });
        }

        let url = format!("{}/v1/completions", self.base_url);
        debug!("inference request: {} estimated prompt tokens", estimated);

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&CompletionRequest {
                prompt,
                max_tokens,
                temperature,
                stop,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(InferenceError::Transient(format!(
                "backend returned {}",
                status
            )));
        }
        if status.is_client_error() {
            return Err(InferenceError::InvalidResponse {
                status: status.as_u16(),
            });
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Transient(format!("malformed completion envelope: {}", e)))?;

        let text = body
            .choices
            .first()
            .map(|choice| choice.text.trim().to_string())
            .ok_or_else(|| InferenceError::Transient("completion had no choices".to_string()))?;

        Ok(text)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        }
    }
}

/// Peels markdown code fences and any leading chatter off a completion,
/// leaving the JSON object the prompt asked for. Returns the input trimmed
/// when no object can be located; the caller's serde parse decides.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let unfenced = FENCE_REGEX
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_passes_plain_objects_through() {
        assert_eq!(extract_json(r#"{"summary": "x"}"#), r#"{"summary": "x"}"#);
    }

    #[test]
    fn extract_json_strips_code_fences() {
        let fenced = "```json\n{\"summary\": \"x\"}\n```";
        assert_eq!(extract_json(fenced), "{\"summary\": \"x\"}");

        let bare_fence = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(bare_fence), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_drops_leading_chatter() {
        let chatty = "Sure, here is the JSON you asked for: {\"a\": 1} Hope it helps!";
        assert_eq!(extract_json(chatty), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_leaves_non_json_untouched() {
        assert_eq!(extract_json("not json"), "not json");
        assert!(serde_json::from_str::<serde_json::Value>(extract_json("not json")).is_err());
    }

    #[test]
    fn retryable_classification() {
        assert!(InferenceError::Timeout.is_retryable());
        assert!(InferenceError::Transient("503".into()).is_retryable());
        assert!(!InferenceError::InvalidResponse { status: 400 }.is_retryable());
        assert!(!InferenceError::PromptTooLarge {
            tokens: 10,
            limit: 5
        }
        .is_retryable());
    }
}

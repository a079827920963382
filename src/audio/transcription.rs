use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::Config;

/// Audio container formats the pipeline accepts. Anything else is rejected
/// at upload time.
pub const SUPPORTED_FORMATS: &[&str] = &[
    ".mp3", ".wav", ".m4a", ".ogg", ".flac", ".aac", ".wma", ".webm",
];

pub fn is_supported_format(filename: &str) -> bool {
    let lowered = filename.to_lowercase();
    SUPPORTED_FORMATS.iter().any(|ext| lowered.ends_with(ext))
}

pub fn supported_formats_list() -> String {
    SUPPORTED_FORMATS.join(", ")
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription request timed out")]
    Timeout,

    #[error("invalid audio input: {0}")]
    InvalidAudio(String),

    /// Backend unavailable or returned 5xx; the job layer may retry.
    #[error("transient transcription failure: {0}")]
    Transient(String),
}

impl TranscriptionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient(_))
    }
}

/// One utterance from the speech-to-text result, with offsets in seconds
/// from the start of the recording.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

/// External speech-to-text service, exchangeable so tests can stub
/// transcripts.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<Transcription, TranscriptionError>;
}

pub struct HttpTranscriber {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.transcriber_url.trim_end_matches('/').to_string(),
            timeout: config.transcriber_timeout(),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for HttpTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcription, TranscriptionError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TranscriptionError::InvalidAudio("path has no file name".to_string()))?
            .to_string();

        if !is_supported_format(&filename) {
            return Err(TranscriptionError::InvalidAudio(format!(
                "unsupported format: {}. Supported: {}",
                filename,
                supported_formats_list()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TranscriptionError::InvalidAudio(format!("cannot read {}: {}", filename, e)))?;

        info!("transcribing {} ({} bytes)", filename, bytes.len());

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(filename.clone()));

        let response = self
            .client
            .post(format!("{}/v1/transcribe", self.base_url))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriptionError::Timeout
                } else {
                    TranscriptionError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TranscriptionError::Transient(format!(
                "backend returned {}",
                status
            )));
        }
        if status.is_client_error() {
            return Err(TranscriptionError::InvalidAudio(format!(
                "backend rejected {} with {}",
                filename, status
            )));
        }

        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Transient(format!("malformed transcript: {}", e)))?;

        info!(
            "transcription complete: {} ({:.1}s, {} chars)",
            transcription.language,
            transcription.duration,
            transcription.text.len()
        );
        Ok(transcription)
    }
}

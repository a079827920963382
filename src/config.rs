use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Runtime configuration. Every field can be set on the command line or
/// through the environment variable named in its `env` attribute.
#[derive(Parser, Debug, Clone)]
#[command(name = "recapd", version, about = "Meeting summarization backend")]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://recapd.sqlite")]
    pub database_url: String,

    /// Address the HTTP API binds to
    #[arg(long, env = "API_HOST", default_value = "127.0.0.1")]
    pub api_host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8000)]
    pub api_port: u16,

    /// Chunk window size in tokens
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 2000)]
    pub chunk_size: usize,

    /// Fraction of the chunk window shared with the previous chunk
    #[arg(long, env = "OVERLAP_RATIO", default_value_t = 0.15)]
    pub overlap_ratio: f64,

    /// Unsummarized-token threshold that triggers a chunk-summary job
    #[arg(long, env = "BATCH_TOKENS", default_value_t = 2000)]
    pub batch_tokens: i64,

    /// Batch monitor wake interval in seconds
    #[arg(long, env = "BATCH_TIMEOUT", default_value_t = 45)]
    pub batch_timeout_secs: u64,

    /// Maximum job execution attempts before a job is marked failed
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: i64,

    /// Base of the exponential retry backoff, in seconds
    #[arg(long, env = "BACKOFF_BASE", default_value_t = 2)]
    pub backoff_base: u64,

    /// Characters per token assumed by the cheap ingest-path estimator
    #[arg(long, env = "CHARS_PER_TOKEN", default_value_t = 4)]
    pub chars_per_token: usize,

    /// Reject a single ingested text above this many characters
    #[arg(long, env = "MAX_INPUT_LENGTH", default_value_t = 10_000_000)]
    pub max_input_length: usize,

    /// Request-size cap applied to inference prompts, in estimated tokens
    #[arg(long, env = "MAX_PROMPT_TOKENS", default_value_t = 15_000)]
    pub max_prompt_tokens: usize,

    #[arg(long, env = "INFERENCE_HOST", default_value = "127.0.0.1")]
    pub inference_host: String,

    #[arg(long, env = "INFERENCE_PORT", default_value_t = 8001)]
    pub inference_port: u16,

    #[arg(long, env = "INFERENCE_API_KEY", default_value = "inference-secret")]
    pub inference_api_key: String,

    /// Per-call deadline for inference requests, in seconds
    #[arg(long, env = "INFERENCE_TIMEOUT_SECS", default_value_t = 120)]
    pub inference_timeout_secs: u64,

    /// Context window advertised by the inference backend
    #[arg(long, env = "INFERENCE_CONTEXT_SIZE", default_value_t = 16384)]
    pub inference_context_size: usize,

    /// GPU layer count forwarded to the inference backend deployment
    #[arg(long, env = "INFERENCE_GPU_LAYERS", default_value_t = 35)]
    pub inference_gpu_layers: u32,

    /// Base URL of the external speech-to-text service
    #[arg(long, env = "TRANSCRIBER_URL", default_value = "http://127.0.0.1:8002")]
    pub transcriber_url: String,

    /// Per-call deadline for transcription requests, in seconds
    #[arg(long, env = "TRANSCRIBER_TIMEOUT_SECS", default_value_t = 300)]
    pub transcriber_timeout_secs: u64,

    /// Number of parallel job workers; defaults to the CPU count
    #[arg(long, env = "WORKER_COUNT")]
    pub workers: Option<usize>,

    /// Maximum pending jobs claimed per worker loop iteration
    #[arg(long, env = "WORKER_CLAIM_BATCH", default_value_t = 5)]
    pub claim_batch: i64,

    /// Directory watched for uploaded audio files
    #[arg(long, env = "INPUT_DIR", default_value = "input")]
    pub input_dir: PathBuf,

    /// Directory where raw transcript text files are archived
    #[arg(long, env = "OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Delete processed audio files instead of archiving them
    #[arg(long, env = "DELETE_AFTER_PROCESSING", default_value_t = false)]
    pub delete_after_processing: bool,
}

impl Config {
    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        let overlap = (self.chunk_size as f64 * self.overlap_ratio) as usize;
        if overlap >= self.chunk_size {
            return Err(format!(
                "overlap of {} tokens must be smaller than the chunk size of {}",
                overlap, self.chunk_size
            ));
        }
        if self.chars_per_token == 0 {
            return Err("chars_per_token must be greater than zero".to_string());
        }
        if self.max_retries < 1 {
            return Err("max_retries must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn inference_url(&self) -> String {
        format!("http://{}:{}", self.inference_host, self.inference_port)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn transcriber_timeout(&self) -> Duration {
        Duration::from_secs(self.transcriber_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::parse_from(["recapd"])
    }

    #[test]
    fn defaults_are_valid() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 2000);
        assert_eq!(config.batch_tokens, 2000);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn rejects_overlap_at_or_above_chunk_size() {
        let mut config = base();
        config.overlap_ratio = 1.0;
        assert!(config.validate().is_err());

        config.overlap_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = base();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}

use crate::error::RagError;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tuning constants for ingestion and chat turns
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per chat turn
    pub top_k: usize,
    /// Upper bound on the assembled prompt, in characters
    pub prompt_budget_chars: usize,
    /// Maximum number of texts sent in one embedding request
    pub embed_batch_size: usize,
    /// Attempts for transient upstream failures (1 = no retry)
    pub retry_max_attempts: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub retry_backoff: Duration,
    /// Capacity of the outbound event channel of a chat turn
    pub stream_buffer: usize,
    /// How long a fragment may wait for channel capacity before the turn fails
    pub stream_send_timeout: Duration,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
            prompt_budget_chars: 12_000,
            embed_batch_size: 100,
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            stream_buffer: 64,
            stream_send_timeout: Duration::from_secs(10),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl RagConfig {
    /// Create a new configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = RagConfig::default();

        let config = RagConfig {
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            top_k: env_or("TOP_K", defaults.top_k)?,
            prompt_budget_chars: env_or("PROMPT_BUDGET_CHARS", defaults.prompt_budget_chars)?,
            embed_batch_size: env_or("EMBED_BATCH_SIZE", defaults.embed_batch_size)?,
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_backoff: Duration::from_millis(env_or(
                "RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            stream_buffer: env_or("STREAM_BUFFER", defaults.stream_buffer)?,
            stream_send_timeout: Duration::from_millis(env_or(
                "STREAM_SEND_TIMEOUT_MS",
                defaults.stream_send_timeout.as_millis() as u64,
            )?),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        if self.chunk_size == 0 || self.chunk_overlap == 0 {
            return Err(RagError::InvalidConfig(
                "chunk size and overlap must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top-k must be at least 1".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embedding batch size must be at least 1".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(RagError::InvalidConfig(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(RagError::InvalidConfig(
                "stream buffer must hold at least one event".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read `key` from the environment, parsing it, or return `default` when unset
pub(crate) fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

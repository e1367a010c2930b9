use thiserror::Error;

/// Errors raised by the ingestion and chat pipelines.
///
/// Every error is scoped to the request or chat turn that produced it.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to extract text: {0}")]
    ExtractionFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Client is not consuming the response stream fast enough")]
    SlowConsumer,

    #[error("Response channel closed")]
    ChannelClosed,
}

impl RagError {
    /// Stable name used on the wire (`{"kind": ...}`).
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::ExtractionFailure(_) => "extraction_failure",
            RagError::InvalidConfig(_) => "invalid_config",
            RagError::EmbeddingUnavailable(_) => "embedding_unavailable",
            RagError::IndexUnavailable(_) => "index_unavailable",
            RagError::GenerationUnavailable(_) => "generation_unavailable",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::SlowConsumer => "slow_consumer",
            RagError::ChannelClosed => "channel_closed",
        }
    }

    /// Upstream failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_)
                | RagError::IndexUnavailable(_)
                | RagError::GenerationUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

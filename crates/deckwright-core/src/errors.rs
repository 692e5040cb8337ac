use std::time::Duration;

/// Failure reported by a section generator.
/// Classifies errors as timeout, retryable, or fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Retryable
    #[error("transient generation failure: {0}")]
    Retryable(String),

    // Fatal
    #[error("generation failed: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Timeouts are not retried automatically; the caller decides.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Retryable(_) => "retryable",
            Self::Fatal(_) => "fatal",
        }
    }
}

use thiserror::Error;

/// Unified error type for the Sage pipeline.
#[derive(Error, Debug)]
pub enum SageError {
    // ── Request validation ─────────────────────────────────────
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    // ── Provider errors ────────────────────────────────────────
    /// The provider failed before producing any output. Retryable down the
    /// fallback chain.
    #[error("provider unavailable: {provider}: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The provider failed after producing output. Not retryable — the
    /// partial content is surfaced to the caller.
    #[error("stream broke after {} chars: {reason}", partial.len())]
    PartialStream { partial: String, reason: String },

    #[error("no provider available for category {0}")]
    NoProviderAvailable(String),

    #[error("generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("generation cancelled")]
    GenerationCancelled,

    #[error("token limit exceeded: requested {requested}, window {window}")]
    TokenLimitExceeded { requested: u32, window: u32 },

    // ── Budget ─────────────────────────────────────────────────
    #[error("budget exhausted: {period}: spent {spent:.4} of {limit:.4} USD")]
    BudgetExhausted {
        period: String,
        spent: f64,
        limit: f64,
    },

    // ── Subsystem errors ───────────────────────────────────────
    #[error("emotion inference failed: {0}")]
    EmotionInference(String),

    #[error("context retrieval failed: {0}")]
    ContextRetrieval(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("model artifact error: {artifact}: {reason}")]
    ModelArtifact { artifact: String, reason: String },

    // ── Config ─────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SageError>;

/// Wire-stable error codes surfaced to clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessageFormat,
    SessionNotFound,
    RateLimitExceeded,
    Unauthorized,
    AiProviderUnavailable,
    ContextRetrievalFailed,
    EmotionDetectionFailed,
    DatabaseError,
    InternalError,
    GenerationTimeout,
    GenerationCancelled,
    TokenLimitExceeded,
    BudgetExhausted,
}

impl SageError {
    /// Map to the wire-stable code clients see.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMessage(_) => ErrorCode::InvalidMessageFormat,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::RateLimited => ErrorCode::RateLimitExceeded,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::ProviderUnavailable { .. } | Self::NoProviderAvailable(_) => {
                ErrorCode::AiProviderUnavailable
            }
            Self::PartialStream { .. } => ErrorCode::AiProviderUnavailable,
            Self::GenerationTimeout(_) => ErrorCode::GenerationTimeout,
            Self::GenerationCancelled => ErrorCode::GenerationCancelled,
            Self::TokenLimitExceeded { .. } => ErrorCode::TokenLimitExceeded,
            Self::BudgetExhausted { .. } => ErrorCode::BudgetExhausted,
            Self::EmotionInference(_) => ErrorCode::EmotionDetectionFailed,
            Self::ContextRetrieval(_) => ErrorCode::ContextRetrievalFailed,
            Self::Database(_) => ErrorCode::DatabaseError,
            _ => ErrorCode::InternalError,
        }
    }

    /// Whether the client may retry the request after seeing this error.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::NoProviderAvailable(_)
                | Self::PartialStream { .. }
                | Self::GenerationTimeout(_)
                | Self::RateLimited
                | Self::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::BudgetExhausted).unwrap();
        assert_eq!(json, "\"BUDGET_EXHAUSTED\"");
        let json = serde_json::to_string(&ErrorCode::AiProviderUnavailable).unwrap();
        assert_eq!(json, "\"AI_PROVIDER_UNAVAILABLE\"");
    }

    #[test]
    fn budget_exhausted_is_terminal() {
        let err = SageError::BudgetExhausted {
            period: "daily".into(),
            spent: 5.0,
            limit: 5.0,
        };
        assert_eq!(err.code(), ErrorCode::BudgetExhausted);
        assert!(!err.recoverable());
    }

    #[test]
    fn partial_stream_keeps_content() {
        let err = SageError::PartialStream {
            partial: "half an answer".into(),
            reason: "connection reset".into(),
        };
        assert!(err.recoverable());
        assert_eq!(err.code(), ErrorCode::AiProviderUnavailable);
    }
}

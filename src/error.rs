//! Error types for Tidewatch.
//!
//! All errors are explicitly typed using thiserror. No panics in production code.

use thiserror::Error;

/// Central error type for all Tidewatch operations.
#[derive(Debug, Error)]
pub enum TidewatchError {
    /// A required report field is missing or out of range.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Classification provider or ingestion endpoint unreachable or returned a non-success status.
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Classification response could not be parsed or lacked a required field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Local queue persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Rate limited by an external API.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// Configuration error (invalid env values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (lock poisoning, missing records).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// Keyword pattern compilation error.
    #[error("Keyword pattern error: {0}")]
    Regex(#[from] regex::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TidewatchError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::Storage(_) | Self::InternalState(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    record_id = ?context.record_id,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            Self::RateLimited { retry_after_ms } => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    retry_after_ms = retry_after_ms,
                    "Rate limited"
                );
            }
            // Remote failures degrade to keyword classification or stay queued
            Self::RemoteUnavailable(_)
            | Self::MalformedResponse(_)
            | Self::Http(_)
            | Self::Json(_) => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    record_id = ?context.record_id,
                    operation = %context.operation,
                    "External service error"
                );
            }
            Self::Validation(_) => {
                tracing::info!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Rejected invalid input"
                );
            }
            Self::Config(_) | Self::Regex(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
        }
    }

    /// Check if this error is critical and requires alerting.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::InternalState(_))
    }

    /// Errors after which classification falls back to keyword scoring.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_)
                | Self::MalformedResponse(_)
                | Self::RateLimited { .. }
                | Self::Http(_)
                | Self::Json(_)
        )
    }

    /// Get user-friendly error message (hides internal details).
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Report is missing its location or hazard type",
            Self::RemoteUnavailable(_) | Self::Http(_) => "Network error, please try again",
            Self::MalformedResponse(_) | Self::Json(_) => "Data format error",
            Self::Storage(_) => {
                "Your report could not be saved on this device. Please try again."
            }
            Self::RateLimited { .. } => "Too many requests, please try again later",
            Self::Config(_) | Self::Regex(_) => "Service configuration error",
            Self::InternalState(_) => "Internal service error",
        }
    }
}

/// Context information for error logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation.
    pub request_id: String,
    /// Report id or queue local id, if known.
    pub record_id: Option<String>,
    /// Operation being performed.
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            record_id: None,
            operation: operation.into(),
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Result type alias for Tidewatch operations.
pub type Result<T> = std::result::Result<T, TidewatchError>;

//! Unified Error Type System
//!
//! Centralized error types for the pipeline, plus the provider error
//! classification that drives fallback decisions in the orchestrator.
//!
//! ## Provider Error Kinds
//!
//! - **Timeout**: Provider did not answer within its timeout (fallback)
//! - **Auth**: Credential rejected (fallback, credential penalized)
//! - **QuotaExceeded**: Provider-side rate limit (fallback, credential throttled)
//! - **MalformedResponse**: Answer could not be parsed (fallback, then local fallback result)
//! - **Unavailable**: Network failure or 5xx (fallback)
//! - **BadRequest**: Request rejected as invalid (ends the chain)

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::request::{ProviderAttempt, RequestState};

// =============================================================================
// Provider Error Kinds
// =============================================================================

/// Classification of a single provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Auth,
    QuotaExceeded,
    MalformedResponse,
    Unavailable,
    BadRequest,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Auth => write!(f, "AUTH"),
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::MalformedResponse => write!(f, "MALFORMED_RESPONSE"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
        }
    }
}

impl ProviderErrorKind {
    /// Check if this kind should move the request to the next provider
    pub fn should_fallback(&self) -> bool {
        !matches!(self, Self::BadRequest)
    }

    /// Check if the failure is attributable to the credential rather than the backend
    pub fn is_credential_fault(&self) -> bool {
        matches!(self, Self::Auth | Self::QuotaExceeded)
    }
}

// =============================================================================
// Provider Error
// =============================================================================

/// Classified provider error with context and retry hints
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub provider: Option<String>,
    /// Suggested wait before the credential is used again
    pub retry_after: Option<Duration>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.kind, self.message)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        kind: ProviderErrorKind,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::with_provider(
            ProviderErrorKind::Timeout,
            format!("no response within {:?}", after),
            provider,
        )
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_provider(ProviderErrorKind::MalformedResponse, message, provider)
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn should_fallback(&self) -> bool {
        self.kind.should_fallback()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps transport-level failures onto provider error kinds
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP status code returned by a provider endpoint
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> ProviderError {
        match status {
            429 => ProviderError::with_provider(ProviderErrorKind::QuotaExceeded, message, provider)
                .retry_after(Duration::from_secs(60)),
            401 | 403 => ProviderError::with_provider(ProviderErrorKind::Auth, message, provider),
            400 | 413 | 422 => {
                ProviderError::with_provider(ProviderErrorKind::BadRequest, message, provider)
            }
            408 | 504 => ProviderError::with_provider(ProviderErrorKind::Timeout, message, provider),
            _ => ProviderError::with_provider(ProviderErrorKind::Unavailable, message, provider),
        }
    }

    /// Classify a reqwest transport error
    pub fn classify_transport(err: &reqwest::Error, provider: &str) -> ProviderError {
        if err.is_timeout() {
            return ProviderError::with_provider(
                ProviderErrorKind::Timeout,
                err.to_string(),
                provider,
            );
        }
        if let Some(status) = err.status() {
            return Self::classify_http_status(status.as_u16(), &err.to_string(), provider);
        }
        if err.is_decode() {
            return ProviderError::malformed(provider, err.to_string());
        }
        ProviderError::with_provider(ProviderErrorKind::Unavailable, err.to_string(), provider)
    }

    /// Parse a `Retry-After` header value given in seconds
    pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
        value
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum TidyError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Enqueue Errors
    // -------------------------------------------------------------------------
    #[error("Zone not configured: {0}")]
    ZoneNotConfigured(String),

    #[error("Zone disabled: {0}")]
    ZoneDisabled(String),

    #[error("Queue full: {depth} requests pending (limit {limit})")]
    QueueFull { depth: usize, limit: usize },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    // -------------------------------------------------------------------------
    // Execution Errors
    // -------------------------------------------------------------------------
    #[error("Capture failed for camera {camera}: {message}")]
    Capture { camera: String, message: String },

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("All providers exhausted after {} attempt(s): {}", .attempts.len(), summarize_attempts(.attempts))]
    AllProvidersExhausted { attempts: Vec<ProviderAttempt> },

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Analysis {state}: {reason}")]
    NotCompleted { state: RequestState, reason: String },

    #[error("Task list error: {0}")]
    TaskList(String),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Infrastructure Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn summarize_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no eligible provider".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}={}", a.provider, a.outcome))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ProviderError> for TidyError {
    fn from(err: ProviderError) -> Self {
        TidyError::Provider(err)
    }
}

impl From<r2d2::Error> for TidyError {
    fn from(err: r2d2::Error) -> Self {
        TidyError::Storage(format!("Connection pool error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, TidyError>;

impl TidyError {
    pub fn capture(camera: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capture {
            camera: camera.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Errors raised synchronously by `enqueue`
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ZoneNotConfigured(_)
                | Self::ZoneDisabled(_)
                | Self::QueueFull { .. }
                | Self::ShuttingDown
        )
    }
}

/// Context extension trait for storage-layer errors
pub trait ResultExt<T> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| TidyError::Storage(format!("{}: {}", context.into(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::AttemptOutcome;

    #[test]
    fn test_kind_display() {
        assert_eq!(ProviderErrorKind::Timeout.to_string(), "TIMEOUT");
        assert_eq!(ProviderErrorKind::QuotaExceeded.to_string(), "QUOTA_EXCEEDED");
        assert_eq!(
            ProviderErrorKind::MalformedResponse.to_string(),
            "MALFORMED_RESPONSE"
        );
    }

    #[test]
    fn test_kind_fallback() {
        assert!(ProviderErrorKind::Timeout.should_fallback());
        assert!(ProviderErrorKind::Auth.should_fallback());
        assert!(ProviderErrorKind::QuotaExceeded.should_fallback());
        assert!(ProviderErrorKind::MalformedResponse.should_fallback());
        assert!(ProviderErrorKind::Unavailable.should_fallback());
        assert!(!ProviderErrorKind::BadRequest.should_fallback());
    }

    #[test]
    fn test_credential_fault() {
        assert!(ProviderErrorKind::Auth.is_credential_fault());
        assert!(ProviderErrorKind::QuotaExceeded.is_credential_fault());
        assert!(!ProviderErrorKind::Timeout.is_credential_fault());
    }

    #[test]
    fn test_classify_http_status() {
        let quota = ErrorClassifier::classify_http_status(429, "slow down", "openai");
        assert_eq!(quota.kind, ProviderErrorKind::QuotaExceeded);
        assert_eq!(quota.retry_after, Some(Duration::from_secs(60)));

        let auth = ErrorClassifier::classify_http_status(401, "bad key", "openai");
        assert_eq!(auth.kind, ProviderErrorKind::Auth);

        let bad = ErrorClassifier::classify_http_status(400, "bad image", "openai");
        assert_eq!(bad.kind, ProviderErrorKind::BadRequest);

        let down = ErrorClassifier::classify_http_status(503, "down", "ollama");
        assert_eq!(down.kind, ProviderErrorKind::Unavailable);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            ErrorClassifier::parse_retry_after(Some(" 12 ")),
            Some(Duration::from_secs(12))
        );
        assert_eq!(ErrorClassifier::parse_retry_after(Some("soon")), None);
        assert_eq!(ErrorClassifier::parse_retry_after(None), None);
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::with_provider(ProviderErrorKind::Auth, "key revoked", "openai");
        assert_eq!(err.to_string(), "[openai:AUTH] key revoked");

        let bare = ProviderError::new(ProviderErrorKind::Unavailable, "connection refused");
        assert_eq!(bare.to_string(), "[UNAVAILABLE] connection refused");
    }

    #[test]
    fn test_exhausted_display_lists_attempts() {
        let err = TidyError::AllProvidersExhausted {
            attempts: vec![
                ProviderAttempt {
                    provider: "a".into(),
                    key_id: None,
                    outcome: AttemptOutcome::Failed(ProviderErrorKind::Timeout),
                    latency_ms: 10,
                    message: None,
                },
                ProviderAttempt {
                    provider: "b".into(),
                    key_id: Some("k1".into()),
                    outcome: AttemptOutcome::Failed(ProviderErrorKind::Auth),
                    latency_ms: 5,
                    message: None,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "All providers exhausted after 2 attempt(s): a=failed:TIMEOUT, b=failed:AUTH"
        );

        let empty = TidyError::AllProvidersExhausted { attempts: vec![] };
        assert!(empty.to_string().contains("no eligible provider"));
    }

    #[test]
    fn test_is_rejection() {
        assert!(TidyError::QueueFull { depth: 3, limit: 3 }.is_rejection());
        assert!(TidyError::ZoneDisabled("garage".into()).is_rejection());
        assert!(!TidyError::capture("cam", "offline").is_rejection());
    }
}

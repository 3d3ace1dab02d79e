//! Analysis request lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::analysis::BatchAnalysisResult;
use super::error::ProviderErrorKind;

/// Type-safe wrapper for request IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Request priority class. Variant order is dequeue order, highest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Scheduled,
    Triggered,
    Manual,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Triggered => "triggered",
            Self::Manual => "manual",
        }
    }

    /// Only background sweeps are subject to backpressure
    pub fn is_sheddable(&self) -> bool {
        matches!(self, Self::Scheduled)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "triggered" => Ok(Self::Triggered),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of analysis work for one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: RequestId,
    pub zone: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub state: RequestState,
    /// 0 for the first attempt, incremented on each retry
    pub attempt: u32,
    pub retry_of: Option<RequestId>,
}

impl AnalysisRequest {
    pub fn new(zone: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: RequestId::generate(),
            zone: zone.into(),
            priority,
            enqueued_at: Utc::now(),
            state: RequestState::Queued,
            attempt: 0,
            retry_of: None,
        }
    }

    /// Follow-up request scheduled after this one failed
    pub fn retry(&self) -> Self {
        Self {
            id: RequestId::generate(),
            zone: self.zone.clone(),
            priority: self.priority,
            enqueued_at: Utc::now(),
            state: RequestState::Queued,
            attempt: self.attempt + 1,
            retry_of: Some(self.id.clone()),
        }
    }
}

// =============================================================================
// Provider Attempts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "kind")]
pub enum AttemptOutcome {
    Success,
    Failed(ProviderErrorKind),
    /// Lost a race to another provider
    Cancelled,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(kind) => write!(f, "failed:{}", kind),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of a single provider invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub key_id: Option<String>,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProviderAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }

    pub fn failure_kind(&self) -> Option<ProviderErrorKind> {
        match self.outcome {
            AttemptOutcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
    pub attempts: Vec<ProviderAttempt>,
    pub retry_scheduled: bool,
}

/// Terminal outcome of a request. Exactly one per terminal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RequestOutcome {
    Completed(Box<BatchAnalysisResult>),
    Failed(FailureRecord),
    Cancelled { reason: String },
}

impl RequestOutcome {
    pub fn state(&self) -> RequestState {
        match self {
            Self::Completed(_) => RequestState::Completed,
            Self::Failed(_) => RequestState::Failed,
            Self::Cancelled { .. } => RequestState::Cancelled,
        }
    }

    pub fn result(&self) -> Option<&BatchAnalysisResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

//! Pipeline telemetry events and sinks.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::types::{Priority, ProviderAttempt, RequestId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum TelemetryEvent {
    #[serde(rename = "analysis.enqueued")]
    Enqueued {
        request_id: RequestId,
        zone: String,
        priority: Priority,
    },
    #[serde(rename = "analysis.started")]
    Started {
        request_id: RequestId,
        zone: String,
        attempt: u32,
    },
    #[serde(rename = "analysis.completed")]
    Completed {
        request_id: RequestId,
        zone: String,
        provider: Option<String>,
        cache_hit: bool,
        latency_ms: u64,
    },
    #[serde(rename = "analysis.failed")]
    Failed {
        request_id: RequestId,
        zone: String,
        error: String,
        attempts: Vec<ProviderAttempt>,
    },
    #[serde(rename = "analysis.cancelled")]
    Cancelled {
        request_id: RequestId,
        zone: String,
        reason: String,
    },
    #[serde(rename = "quota.exhausted")]
    QuotaExhausted { key_id: String },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "analysis.enqueued",
            Self::Started { .. } => "analysis.started",
            Self::Completed { .. } => "analysis.completed",
            Self::Failed { .. } => "analysis.failed",
            Self::Cancelled { .. } => "analysis.cancelled",
            Self::QuotaExhausted { .. } => "quota.exhausted",
        }
    }
}

/// Destination for pipeline events. Emission never fails the pipeline.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

pub type SharedTelemetry = Arc<dyn TelemetrySink>;

/// Writes every event as a structured `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::Failed {
                zone,
                error,
                attempts,
                ..
            } => warn!(
                target: "tidyzone::telemetry",
                event = event.name(),
                zone = %zone,
                attempts = attempts.len(),
                error = %error,
            ),
            TelemetryEvent::QuotaExhausted { key_id } => warn!(
                target: "tidyzone::telemetry",
                event = event.name(),
                key_id = %key_id,
            ),
            _ => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                info!(target: "tidyzone::telemetry", event = event.name(), payload = %payload);
            }
        }
    }
}

/// Keeps events in memory, for tests and the one-shot CLI summary
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TelemetryEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

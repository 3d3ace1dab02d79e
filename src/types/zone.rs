//! Zones, task items and per-zone status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analysis::CleanlinessState;
use super::request::RequestId;
use crate::constants::zone::DEFAULT_INTERVAL_SECS;

/// A named physical area watched by one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    /// Camera reference handed to the image capture adapter
    pub camera: String,
    /// Task list reference handed to the task list adapter
    pub task_list: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub ignore_rules: Vec<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_enabled() -> bool {
    true
}

impl ZoneConfig {
    pub fn new(
        name: impl Into<String>,
        camera: impl Into<String>,
        task_list: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            camera: camera.into(),
            task_list: task_list.into(),
            purpose: String::new(),
            ignore_rules: Vec::new(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            enabled: true,
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_ignore_rule(mut self, rule: impl Into<String>) -> Self {
        self.ignore_rules.push(rule.into());
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// =============================================================================
// Task Items
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Lenient parse; unknown values become `Medium`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Self::Low,
            "high" | "urgent" | "critical" => Self::High,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NeedsAction,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsAction => "needs_action",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "needs_action" => Some(Self::NeedsAction),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
}

impl TaskItem {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::NeedsAction
    }

    /// Description key used for duplicate detection
    pub fn match_key(&self) -> String {
        normalize_description(&self.description)
    }
}

/// Lowercase, trim, collapse inner whitespace and drop trailing punctuation
pub fn normalize_description(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .to_string()
}

// =============================================================================
// Zone Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRunStatus {
    #[default]
    Idle,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ZoneRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

/// Queryable per-zone observability state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub zone: String,
    pub status: ZoneRunStatus,
    pub score: Option<u8>,
    pub state: CleanlinessState,
    pub last_run: Option<DateTime<Utc>>,
    pub last_provider: Option<String>,
    pub last_error: Option<String>,
    pub last_request: Option<RequestId>,
}

impl ZoneStatus {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            status: ZoneRunStatus::Idle,
            score: None,
            state: CleanlinessState::Unknown,
            last_run: None,
            last_provider: None,
            last_error: None,
            last_request: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_description() {
        assert_eq!(
            normalize_description("  Put away   the dishes. "),
            "put away the dishes"
        );
        assert_eq!(normalize_description("Fold Laundry!"), "fold laundry");
    }

    #[test]
    fn test_task_priority_lenient() {
        assert_eq!(TaskPriority::parse_lenient("URGENT"), TaskPriority::High);
        assert_eq!(TaskPriority::parse_lenient("minor"), TaskPriority::Low);
        assert_eq!(TaskPriority::parse_lenient("whenever"), TaskPriority::Medium);
    }

    #[test]
    fn test_zone_builder() {
        let zone = ZoneConfig::new("kitchen", "camera.kitchen", "todo.kitchen")
            .with_purpose("cooking area")
            .with_ignore_rule("fruit bowl on the counter")
            .with_interval(600);
        assert_eq!(zone.ignore_rules.len(), 1);
        assert_eq!(zone.interval_secs, 600);
        assert!(zone.enabled);
        assert!(!zone.clone().disabled().enabled);
    }

    #[test]
    fn test_zone_deserialize_defaults() {
        let zone: ZoneConfig = serde_json::from_str(
            r#"{"name":"office","camera":"cam/office.jpg","task_list":"office"}"#,
        )
        .unwrap();
        assert!(zone.enabled);
        assert_eq!(zone.interval_secs, DEFAULT_INTERVAL_SECS);
        assert!(zone.purpose.is_empty());
    }
}

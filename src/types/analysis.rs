//! Batched analysis result model.
//!
//! One provider call answers three questions jointly: which active tasks look
//! done, which new tasks should be created, and how clean the zone is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::zone::TaskPriority;
use crate::constants::analysis::NEUTRAL_SCORE;

/// An active task the provider believes has been completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: String,
    /// 0.0..=1.0
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// A task the provider proposes to add
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTask {
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanlinessState {
    Clean,
    Acceptable,
    NeedsAttention,
    Messy,
    #[default]
    Unknown,
}

impl CleanlinessState {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Clean,
            60..=79 => Self::Acceptable,
            40..=59 => Self::NeedsAttention,
            _ => Self::Messy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Acceptable => "acceptable",
            Self::NeedsAttention => "needs_attention",
            Self::Messy => "messy",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "clean" | "spotless" | "tidy" => Some(Self::Clean),
            "acceptable" | "ok" | "fair" => Some(Self::Acceptable),
            "needs_attention" | "cluttered" => Some(Self::NeedsAttention),
            "messy" | "dirty" | "very_messy" => Some(Self::Messy),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanlinessAssessment {
    /// 0..=100, higher is cleaner
    pub score: u8,
    pub state: CleanlinessState,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub analyzed_at: DateTime<Utc>,
    pub provider: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
    /// Substituted locally because no provider answer could be parsed
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self {
            analyzed_at: Utc::now(),
            provider: None,
            cache_hit: false,
            fallback: false,
            latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnalysisResult {
    pub completed_tasks: Vec<CompletedTask>,
    pub new_tasks: Vec<ProposedTask>,
    pub cleanliness: CleanlinessAssessment,
    pub metadata: ResultMetadata,
}

impl BatchAnalysisResult {
    /// Neutral result used when no provider answer could be interpreted
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            completed_tasks: Vec::new(),
            new_tasks: Vec::new(),
            cleanliness: CleanlinessAssessment {
                score: NEUTRAL_SCORE,
                state: CleanlinessState::Unknown,
                observations: vec![reason.into()],
                recommendations: Vec::new(),
            },
            metadata: ResultMetadata {
                fallback: true,
                ..ResultMetadata::default()
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.fallback
    }
}

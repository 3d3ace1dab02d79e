//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/tidyzone/) and project (.tidyzone/) level configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{analysis, cache, orchestrator, quota, scheduler};
use crate::types::{Result, TidyError, ZoneConfig};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub quota: QuotaConfig,
    pub orchestrator: OrchestratorConfig,
    pub analysis: AnalysisConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,

    pub zones: Vec<ZoneConfig>,
    pub providers: Vec<ProviderConfig>,
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            quota: QuotaConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            analysis: AnalysisConfig::default(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            zones: Vec::new(),
            providers: Vec::new(),
            api_keys: Vec::new(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `TidyError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            return Err(TidyError::Config(
                "scheduler.workers must be greater than 0".to_string(),
            ));
        }

        if self.cache.ttl_secs == 0 || self.cache.capacity == 0 {
            return Err(TidyError::Config(
                "cache.ttl_secs and cache.capacity must be greater than 0".to_string(),
            ));
        }

        if self.quota.healthy_threshold_pct > 100 {
            return Err(TidyError::Config(format!(
                "quota.healthy_threshold_pct must be at most 100, got {}",
                self.quota.healthy_threshold_pct
            )));
        }

        if self.quota.breaker_threshold == 0 {
            return Err(TidyError::Config(
                "quota.breaker_threshold must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.analysis.completion_confidence_threshold) {
            return Err(TidyError::Config(format!(
                "analysis.completion_confidence_threshold must be between 0.0 and 1.0, got {}",
                self.analysis.completion_confidence_threshold
            )));
        }

        let mut zone_names = HashSet::new();
        for zone in &self.zones {
            if zone.name.trim().is_empty() {
                return Err(TidyError::Config("zone name must not be empty".to_string()));
            }
            if !zone_names.insert(zone.name.as_str()) {
                return Err(TidyError::Config(format!("duplicate zone: {}", zone.name)));
            }
            if zone.camera.trim().is_empty() || zone.task_list.trim().is_empty() {
                return Err(TidyError::Config(format!(
                    "zone {} needs a camera and a task_list",
                    zone.name
                )));
            }
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if !provider_names.insert(provider.name.as_str()) {
                return Err(TidyError::Config(format!(
                    "duplicate provider: {}",
                    provider.name
                )));
            }
            if provider.timeout_secs == 0 || provider.max_concurrent == 0 {
                return Err(TidyError::Config(format!(
                    "provider {} needs timeout_secs and max_concurrent greater than 0",
                    provider.name
                )));
            }
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(TidyError::Config(format!(
                    "provider {} temperature must be between 0.0 and 2.0, got {}",
                    provider.name, provider.temperature
                )));
            }
        }

        let mut key_ids = HashSet::new();
        for key in &self.api_keys {
            if !key_ids.insert(key.id.as_str()) {
                return Err(TidyError::Config(format!("duplicate api key id: {}", key.id)));
            }
            if let Some(unknown) = key
                .providers
                .iter()
                .find(|p| !provider_names.contains(p.as_str()))
            {
                return Err(TidyError::Config(format!(
                    "api key {} is scoped to unknown provider {}",
                    key.id, unknown
                )));
            }
        }

        Ok(())
    }

    pub fn zone(&self, name: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.name == name)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Queue depth at which scheduled requests are rejected
    pub queue_limit: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_secs: u64,
    pub shutdown_grace_secs: u64,
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: scheduler::DEFAULT_WORKERS,
            queue_limit: scheduler::DEFAULT_QUEUE_LIMIT,
            max_retries: scheduler::DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: scheduler::RETRY_BASE_DELAY_MS,
            retry_max_delay_secs: scheduler::RETRY_MAX_DELAY_SECS,
            shutdown_grace_secs: scheduler::SHUTDOWN_GRACE_SECS,
            tick_interval_secs: scheduler::TICK_INTERVAL_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: cache::DEFAULT_TTL_SECS,
            capacity: cache::DEFAULT_CAPACITY,
        }
    }
}

// =============================================================================
// Quota
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Preferred keys keep at least this share of their daily limit
    pub healthy_threshold_pct: u8,
    /// Consecutive errors before a key is disabled
    pub breaker_threshold: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            healthy_threshold_pct: quota::HEALTHY_THRESHOLD_PCT,
            breaker_threshold: quota::BREAKER_THRESHOLD,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Race the top providers for manual requests
    pub racing_enabled: bool,
    pub race_top_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            racing_enabled: false,
            race_top_k: orchestrator::DEFAULT_RACE_TOP_K,
        }
    }
}

// =============================================================================
// Analysis
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub completion_confidence_threshold: f32,
    pub max_new_tasks: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            completion_confidence_threshold: analysis::COMPLETION_CONFIDENCE_THRESHOLD,
            max_new_tasks: analysis::MAX_NEW_TASKS,
        }
    }
}

// =============================================================================
// Capture
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Read snapshots from files under `base_dir`
    #[default]
    File,
    /// Fetch snapshots from HTTP(S) URLs
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub kind: CaptureKind,
    pub base_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            kind: CaptureKind::File,
            base_dir: PathBuf::from(".tidyzone/snapshots"),
            timeout_secs: crate::constants::network::CAPTURE_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".tidyzone/tidyzone.db"),
        }
    }
}

// =============================================================================
// Providers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions with image input
    #[default]
    OpenAi,
    /// Local Ollama vision model
    Ollama,
    /// Scripted in-memory backend returning a canned analysis
    Mock,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Mock => write!(f, "mock"),
        }
    }
}

/// One configured vision backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Lower ranks first
    pub priority: u32,
    pub enabled: bool,
    pub model: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub fallback_eligible: bool,
    /// Whether calls need a credential from the quota ledger
    pub requires_key: bool,
    pub api_base: Option<String>,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            priority: 0,
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: orchestrator::DEFAULT_TIMEOUT_SECS,
            max_concurrent: orchestrator::DEFAULT_MAX_CONCURRENT,
            fallback_eligible: true,
            requires_key: true,
            api_base: None,
            temperature: 0.2,
        }
    }
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            requires_key: kind == ProviderKind::OpenAi,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_requires_key(mut self, requires_key: bool) -> Self {
        self.requires_key = requires_key;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// API Keys
// =============================================================================

/// Quota-tracked credential
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    pub id: String,
    /// Inline credential. Never serialized back out.
    #[serde(skip_serializing)]
    pub key: Option<String>,
    /// Environment variable holding the credential
    pub key_env: Option<String>,
    /// Providers allowed to use this key; empty means any
    pub providers: Vec<String>,
    pub daily_limit: u32,
    pub minute_limit: u32,
}

impl std::fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("id", &self.id)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("key_env", &self.key_env)
            .field("providers", &self.providers)
            .field("daily_limit", &self.daily_limit)
            .field("minute_limit", &self.minute_limit)
            .finish()
    }
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            key: None,
            key_env: None,
            providers: Vec::new(),
            daily_limit: quota::DEFAULT_DAILY_LIMIT,
            minute_limit: quota::DEFAULT_MINUTE_LIMIT,
        }
    }
}

impl ApiKeyConfig {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, daily: u32, minute: u32) -> Self {
        self.daily_limit = daily;
        self.minute_limit = minute;
        self
    }

    pub fn scoped_to(mut self, provider: impl Into<String>) -> Self {
        self.providers.push(provider.into());
        self
    }

    /// Inline key first, then the named environment variable
    pub fn resolve_key(&self) -> Option<String> {
        self.key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.key_env
                    .as_ref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

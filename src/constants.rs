//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Scheduler constants
pub mod scheduler {
    /// Default number of worker tasks
    pub const DEFAULT_WORKERS: usize = 2;

    /// Queue depth at which scheduled requests are rejected
    pub const DEFAULT_QUEUE_LIMIT: usize = 32;

    /// Follow-up requests allowed after a failure
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 2_000;

    /// Maximum delay between retries (seconds)
    pub const RETRY_MAX_DELAY_SECS: u64 = 120;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Time in-flight work gets to finish on shutdown (seconds)
    pub const SHUTDOWN_GRACE_SECS: u64 = 30;

    /// How often the ticker looks for due zones (seconds)
    pub const TICK_INTERVAL_SECS: u64 = 30;

    /// Terminal requests kept for `wait` and `request` lookups
    pub const MAX_TRACKED_REQUESTS: usize = 1_024;
}

/// Provider orchestration constants
pub mod orchestrator {
    /// Default per-provider call timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Default concurrent calls per provider
    pub const DEFAULT_MAX_CONCURRENT: usize = 2;

    /// Providers raced for manual requests when racing is enabled
    pub const DEFAULT_RACE_TOP_K: usize = 2;
}

/// Quota ledger constants
pub mod quota {
    /// Consecutive errors before a credential is disabled for the session
    pub const BREAKER_THRESHOLD: u32 = 5;

    /// Keys with at least this share of their daily limit left are preferred
    pub const HEALTHY_THRESHOLD_PCT: u8 = 20;

    /// Per-minute window (seconds)
    pub const MINUTE_WINDOW_SECS: u64 = 60;

    /// Daily window (seconds)
    pub const DAY_WINDOW_SECS: u64 = 24 * 60 * 60;

    pub const DEFAULT_DAILY_LIMIT: u32 = 1_000;
    pub const DEFAULT_MINUTE_LIMIT: u32 = 15;
}

/// Analysis cache constants
pub mod cache {
    /// Default entry lifetime (seconds)
    pub const DEFAULT_TTL_SECS: u64 = 300;

    /// Default maximum number of entries
    pub const DEFAULT_CAPACITY: usize = 256;
}

/// Result application constants
pub mod analysis {
    /// Score reported by the fallback result
    pub const NEUTRAL_SCORE: u8 = 50;

    /// Minimum confidence before a task is marked done
    pub const COMPLETION_CONFIDENCE_THRESHOLD: f32 = 0.7;

    /// Upper bound on tasks created from one analysis
    pub const MAX_NEW_TASKS: usize = 5;
}

/// Zone defaults
pub mod zone {
    /// Default check interval for scheduled analysis (seconds)
    pub const DEFAULT_INTERVAL_SECS: u64 = 3_600;
}

/// Network constants
pub mod network {
    /// Snapshot download timeout (seconds)
    pub const CAPTURE_TIMEOUT_SECS: u64 = 15;

    /// Largest accepted snapshot (bytes)
    pub const MAX_SNAPSHOT_BYTES: usize = 20 * 1024 * 1024;

    pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
    pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";
}

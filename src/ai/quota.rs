//! Quota Ledger
//!
//! Tracks per-credential request budgets and a per-credential breaker.
//!
//! ## Windows
//!
//! Counters reset lazily whenever a key is touched: the minute counter once
//! 60 seconds have passed since its window opened, the daily counter after
//! 24 hours.
//!
//! ## Selection
//!
//! Keys are scanned round-robin from a shared cursor. The first pass only
//! takes keys that still hold a healthy share of their daily budget; the
//! second pass takes any key that can make a request.
//!
//! ## Breaker
//!
//! ```text
//! available --[breaker_threshold consecutive errors]--> disabled (session)
//! ```

use secrecy::SecretString;
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ApiKeyConfig, QuotaConfig};
use crate::constants::quota::{DAY_WINDOW_SECS, MINUTE_WINDOW_SECS};
use crate::services::{SharedTelemetry, TelemetryEvent};
use crate::types::ProviderErrorKind;

/// Live quota state of one credential
#[derive(Debug)]
pub struct ApiKeyStatus {
    pub key_id: String,
    credential: SecretString,
    /// Providers allowed to use this key; empty means any
    pub scope: Vec<String>,
    pub daily_limit: u32,
    pub minute_limit: u32,
    pub requests_today: u32,
    pub requests_this_minute: u32,
    pub minute_started: Instant,
    pub day_started: Instant,
    pub available: bool,
    pub consecutive_errors: u32,
    pub total_requests: u64,
    pub total_errors: u64,
}

impl ApiKeyStatus {
    pub fn new(
        key_id: impl Into<String>,
        credential: SecretString,
        daily_limit: u32,
        minute_limit: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            key_id: key_id.into(),
            credential,
            scope: Vec::new(),
            daily_limit,
            minute_limit,
            requests_today: 0,
            requests_this_minute: 0,
            minute_started: now,
            day_started: now,
            available: true,
            consecutive_errors: 0,
            total_requests: 0,
            total_errors: 0,
        }
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Apply elapsed window resets
    pub fn refresh(&mut self, now: Instant) {
        if now.saturating_duration_since(self.minute_started)
            >= Duration::from_secs(MINUTE_WINDOW_SECS)
        {
            self.requests_this_minute = 0;
            self.minute_started = now;
        }
        if now.saturating_duration_since(self.day_started) >= Duration::from_secs(DAY_WINDOW_SECS)
        {
            self.requests_today = 0;
            self.day_started = now;
        }
    }

    pub fn daily_remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.requests_today)
    }

    pub fn minute_remaining(&self) -> u32 {
        self.minute_limit.saturating_sub(self.requests_this_minute)
    }

    pub fn can_make_request(&self) -> bool {
        self.available && self.daily_remaining() > 0 && self.minute_remaining() > 0
    }

    pub fn in_scope(&self, provider: &str) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|p| p == provider)
    }

    fn is_healthy(&self, threshold_pct: u8) -> bool {
        u64::from(self.daily_remaining()) * 100
            >= u64::from(self.daily_limit) * u64::from(threshold_pct)
    }

    fn snapshot(&self) -> KeyStatusSnapshot {
        KeyStatusSnapshot {
            key_id: self.key_id.clone(),
            scope: self.scope.clone(),
            daily_limit: self.daily_limit,
            minute_limit: self.minute_limit,
            daily_remaining: self.daily_remaining(),
            minute_remaining: self.minute_remaining(),
            available: self.available,
            consecutive_errors: self.consecutive_errors,
            total_requests: self.total_requests,
            total_errors: self.total_errors,
        }
    }
}

/// Serializable view of a key for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatusSnapshot {
    pub key_id: String,
    pub scope: Vec<String>,
    pub daily_limit: u32,
    pub minute_limit: u32,
    pub daily_remaining: u32,
    pub minute_remaining: u32,
    pub available: bool,
    pub consecutive_errors: u32,
    pub total_requests: u64,
    pub total_errors: u64,
}

/// A reserved request slot on one credential
#[derive(Debug, Clone)]
pub struct KeyLease {
    pub key_id: String,
    pub credential: SecretString,
    pub daily_remaining: u32,
    pub minute_remaining: u32,
}

/// How a batch of N analyses fits into the remaining quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Everything can be sent now
    Immediate { batch_size: usize },
    /// The day budget covers the batch but the minute budget does not
    Throttled {
        ready_now: usize,
        batch_size: usize,
        batches: usize,
        interval: Duration,
    },
    /// Not enough daily budget; the remainder should use fallback handling
    Partial {
        proceed_now: usize,
        deferred: usize,
        use_fallback: bool,
    },
}

impl BatchPlan {
    /// Number of items that may be dispatched right away
    pub fn proceed_now(&self) -> usize {
        match self {
            Self::Immediate { batch_size } => *batch_size,
            Self::Throttled { ready_now, .. } => *ready_now,
            Self::Partial { proceed_now, .. } => *proceed_now,
        }
    }
}

pub struct QuotaLedger {
    keys: Vec<Mutex<ApiKeyStatus>>,
    cursor: AtomicUsize,
    config: QuotaConfig,
    telemetry: Option<SharedTelemetry>,
}

impl QuotaLedger {
    pub fn new(keys: Vec<ApiKeyStatus>, config: QuotaConfig) -> Self {
        Self {
            keys: keys.into_iter().map(Mutex::new).collect(),
            cursor: AtomicUsize::new(0),
            config,
            telemetry: None,
        }
    }

    /// Build from configuration; keys without a resolvable credential are skipped
    pub fn from_config(keys: &[ApiKeyConfig], config: QuotaConfig) -> Self {
        let statuses = keys
            .iter()
            .filter_map(|key| match key.resolve_key() {
                Some(secret) => Some(
                    ApiKeyStatus::new(
                        key.id.clone(),
                        SecretString::from(secret),
                        key.daily_limit,
                        key.minute_limit,
                    )
                    .with_scope(key.providers.clone()),
                ),
                None => {
                    warn!(key_id = %key.id, "API key has no credential configured, skipping");
                    None
                }
            })
            .collect();
        Self::new(statuses, config)
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lock(&self, idx: usize) -> std::sync::MutexGuard<'_, ApiKeyStatus> {
        self.keys[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find(&self, key_id: &str) -> Option<usize> {
        (0..self.keys.len()).find(|&idx| self.lock(idx).key_id == key_id)
    }

    fn emit_exhausted(&self, key_id: &str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.emit(TelemetryEvent::QuotaExhausted {
                key_id: key_id.to_string(),
            });
        }
    }

    /// Reserve one request on a key usable by `provider`
    pub fn reserve(&self, provider: &str) -> Option<KeyLease> {
        self.reserve_at(provider, Instant::now())
    }

    pub fn reserve_at(&self, provider: &str, now: Instant) -> Option<KeyLease> {
        let count = self.keys.len();
        if count == 0 {
            return None;
        }
        let start = self.cursor.load(Ordering::Relaxed) % count;

        for healthy_only in [true, false] {
            for offset in 0..count {
                let idx = (start + offset) % count;
                let mut key = self.lock(idx);
                key.refresh(now);

                if !key.in_scope(provider) || !key.can_make_request() {
                    continue;
                }
                if healthy_only && !key.is_healthy(self.config.healthy_threshold_pct) {
                    continue;
                }

                key.requests_today += 1;
                key.requests_this_minute += 1;
                key.total_requests += 1;
                self.cursor.store(idx + 1, Ordering::Relaxed);

                let lease = KeyLease {
                    key_id: key.key_id.clone(),
                    credential: key.credential.clone(),
                    daily_remaining: key.daily_remaining(),
                    minute_remaining: key.minute_remaining(),
                };
                drop(key);

                debug!(
                    key_id = %lease.key_id,
                    provider,
                    daily_remaining = lease.daily_remaining,
                    minute_remaining = lease.minute_remaining,
                    "Reserved API key"
                );
                if lease.daily_remaining == 0 {
                    info!(key_id = %lease.key_id, "API key reached its daily limit");
                    self.emit_exhausted(&lease.key_id);
                }
                return Some(lease);
            }
        }

        debug!(provider, "No API key available");
        None
    }

    pub fn record_success(&self, key_id: &str) {
        if let Some(idx) = self.find(key_id) {
            self.lock(idx).consecutive_errors = 0;
        }
    }

    pub fn record_error(&self, key_id: &str, kind: ProviderErrorKind) {
        let Some(idx) = self.find(key_id) else {
            return;
        };
        let mut key = self.lock(idx);
        key.consecutive_errors += 1;
        key.total_errors += 1;

        let throttled = kind == ProviderErrorKind::QuotaExceeded;
        if throttled {
            // Provider says the key is spent for now; sit out the minute window
            key.requests_this_minute = key.minute_limit;
        }

        let tripped =
            key.available && key.consecutive_errors >= self.config.breaker_threshold.max(1);
        if tripped {
            key.available = false;
            warn!(
                key_id = %key.key_id,
                consecutive_errors = key.consecutive_errors,
                "API key disabled after consecutive errors"
            );
        }
        drop(key);

        if throttled {
            self.emit_exhausted(key_id);
        }
    }

    /// Plan dispatch of `n` analyses against remaining quota
    pub fn plan(&self, n: usize) -> BatchPlan {
        self.plan_at(n, Instant::now())
    }

    pub fn plan_at(&self, n: usize, now: Instant) -> BatchPlan {
        if self.keys.is_empty() {
            return BatchPlan::Immediate { batch_size: n };
        }

        let mut ready_now = 0usize;
        let mut per_minute = 0usize;
        let mut day_total = 0usize;
        for idx in 0..self.keys.len() {
            let mut key = self.lock(idx);
            key.refresh(now);
            if !key.available {
                continue;
            }
            let daily = key.daily_remaining() as usize;
            ready_now += daily.min(key.minute_remaining() as usize);
            per_minute += daily.min(key.minute_limit as usize);
            day_total += daily;
        }

        if n <= ready_now {
            BatchPlan::Immediate { batch_size: n }
        } else if n <= day_total {
            let batch_size = per_minute.max(1);
            BatchPlan::Throttled {
                ready_now,
                batch_size,
                batches: n.div_ceil(batch_size),
                interval: Duration::from_secs(MINUTE_WINDOW_SECS),
            }
        } else {
            let proceed_now = ready_now.min(n);
            BatchPlan::Partial {
                proceed_now,
                deferred: n - proceed_now,
                use_fallback: true,
            }
        }
    }

    pub fn statuses(&self) -> Vec<KeyStatusSnapshot> {
        let now = Instant::now();
        (0..self.keys.len())
            .map(|idx| {
                let mut key = self.lock(idx);
                key.refresh(now);
                key.snapshot()
            })
            .collect()
    }

    pub fn status(&self, key_id: &str) -> Option<KeyStatusSnapshot> {
        self.find(key_id).map(|idx| self.lock(idx).snapshot())
    }
}

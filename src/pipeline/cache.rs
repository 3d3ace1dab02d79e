//! Analysis Cache
//!
//! TTL cache of batched analysis results keyed by a SHA-256 digest of every
//! input that influences the answer. Thread-safe through `DashMap`; a cache
//! failure is always a miss, never an error.

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheConfig;
use crate::types::{BatchAnalysisResult, TaskItem, ZoneConfig};

/// Hex digest over image, zone context and active tasks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(image: &[u8], zone: &ZoneConfig, active_tasks: &[TaskItem]) -> Self {
        let mut hasher = Sha256::new();
        field(&mut hasher, image);
        field(&mut hasher, zone.name.as_bytes());
        field(&mut hasher, zone.purpose.as_bytes());

        let mut tasks: Vec<&TaskItem> = active_tasks.iter().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        hasher.update((tasks.len() as u64).to_le_bytes());
        for task in tasks {
            field(&mut hasher, task.id.as_bytes());
            field(&mut hasher, task.description.as_bytes());
        }

        hasher.update((zone.ignore_rules.len() as u64).to_le_bytes());
        for rule in &zone.ignore_rules {
            field(&mut hasher, rule.as_bytes());
        }

        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed so that ("ab", "c") and ("a", "bc") differ
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

struct CacheEntry {
    value: BatchAnalysisResult,
    expires_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct AnalysisCache {
    entries: DashMap<CacheKey, CacheEntry>,
    enabled: bool,
    default_ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl AnalysisCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            enabled: config.enabled,
            default_ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<BatchAnalysisResult> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<BatchAnalysisResult> {
        if !self.enabled {
            return None;
        }

        // Expired entries are dropped on read
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);

        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut value = entry.value.clone();
                value.metadata.cache_hit = true;
                debug!(key = %key.short(), "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result. Fallback results and zero TTLs are ignored.
    pub fn put(&self, key: CacheKey, value: BatchAnalysisResult, ttl: Option<Duration>) {
        self.put_at(key, value, ttl, Instant::now());
    }

    pub fn put_at(
        &self,
        key: CacheKey,
        value: BatchAnalysisResult,
        ttl: Option<Duration>,
        now: Instant,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if !self.enabled || value.is_fallback() || ttl.is_zero() {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.cleanup_expired_at(now);
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );

        // Trim after inserting: concurrent writers may each have seen room
        while self.entries.len() > self.capacity {
            if !self.evict_nearest_expiry(&key) {
                break;
            }
        }
    }

    fn evict_nearest_expiry(&self, keep: &CacheKey) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        match victim {
            Some(key) => {
                if self.entries.remove(&key).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key.short(), "Evicted cache entry");
                }
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Expired cache entries reclaimed");
        }
        removed
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

//! Zone status board
//!
//! Queryable per-zone observability state, optionally written through to the
//! database so `status` can read it from another process.

use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;

use crate::storage::SharedDatabase;
use crate::types::{BatchAnalysisResult, RequestId, ZoneConfig, ZoneRunStatus, ZoneStatus};

pub struct ZoneStatusBoard {
    zones: DashMap<String, ZoneStatus>,
    db: Option<SharedDatabase>,
}

impl ZoneStatusBoard {
    /// Seed from configured zones, restoring persisted state where present
    pub fn new(zones: &[ZoneConfig], db: Option<SharedDatabase>) -> Self {
        let board = Self {
            zones: DashMap::new(),
            db,
        };

        let persisted = match &board.db {
            Some(db) => db.load_zone_statuses().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load persisted zone status");
                Vec::new()
            }),
            None => Vec::new(),
        };

        for zone in zones {
            let mut status = persisted
                .iter()
                .find(|s| s.zone == zone.name)
                .cloned()
                .unwrap_or_else(|| ZoneStatus::new(&zone.name));
            // Anything in flight died with the previous process
            if matches!(status.status, ZoneRunStatus::Queued | ZoneRunStatus::Processing) {
                status.status = ZoneRunStatus::Idle;
            }
            board.zones.insert(zone.name.clone(), status);
        }
        board
    }

    pub fn in_memory(zones: &[ZoneConfig]) -> Self {
        Self::new(zones, None)
    }

    fn update(&self, zone: &str, apply: impl FnOnce(&mut ZoneStatus)) {
        let snapshot = {
            let mut entry = self
                .zones
                .entry(zone.to_string())
                .or_insert_with(|| ZoneStatus::new(zone));
            apply(&mut entry);
            entry.clone()
        };

        if let Some(db) = &self.db
            && let Err(e) = db.upsert_zone_status(&snapshot)
        {
            warn!(zone, error = %e, "Failed to persist zone status");
        }
    }

    pub fn mark_queued(&self, zone: &str, request_id: &RequestId) {
        self.update(zone, |s| {
            s.status = ZoneRunStatus::Queued;
            s.last_request = Some(request_id.clone());
        });
    }

    pub fn mark_processing(&self, zone: &str, request_id: &RequestId) {
        self.update(zone, |s| {
            s.status = ZoneRunStatus::Processing;
            s.last_request = Some(request_id.clone());
        });
    }

    /// Fallback results keep the last real score and state
    pub fn mark_completed(&self, zone: &str, request_id: &RequestId, result: &BatchAnalysisResult) {
        self.update(zone, |s| {
            s.status = ZoneRunStatus::Completed;
            s.last_run = Some(Utc::now());
            s.last_request = Some(request_id.clone());
            s.last_error = None;
            if !result.is_fallback() {
                s.score = Some(result.cleanliness.score);
                s.state = result.cleanliness.state;
                if !result.metadata.cache_hit {
                    s.last_provider = result.metadata.provider.clone();
                }
            }
        });
    }

    pub fn mark_failed(&self, zone: &str, request_id: &RequestId, error: &str) {
        self.update(zone, |s| {
            s.status = ZoneRunStatus::Failed;
            s.last_run = Some(Utc::now());
            s.last_request = Some(request_id.clone());
            s.last_error = Some(error.to_string());
        });
    }

    pub fn mark_cancelled(&self, zone: &str, request_id: &RequestId) {
        self.update(zone, |s| {
            s.status = ZoneRunStatus::Cancelled;
            s.last_request = Some(request_id.clone());
        });
    }

    pub fn get(&self, zone: &str) -> Option<ZoneStatus> {
        self.zones.get(zone).map(|entry| entry.clone())
    }

    /// All zones, sorted by name
    pub fn snapshot(&self) -> Vec<ZoneStatus> {
        let mut all: Vec<ZoneStatus> = self.zones.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.zone.cmp(&b.zone));
        all
    }

    pub fn ensure(&self, zone: &str) {
        self.zones
            .entry(zone.to_string())
            .or_insert_with(|| ZoneStatus::new(zone));
    }

    pub fn remove(&self, zone: &str) {
        self.zones.remove(zone);
    }
}

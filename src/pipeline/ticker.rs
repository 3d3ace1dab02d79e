//! Zone Ticker
//!
//! Periodically enqueues `Scheduled` analyses for zones whose check interval
//! has elapsed. The number dispatched per tick is bounded by the quota
//! ledger's batch plan; the rest wait for a later tick.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::AnalysisCache;
use super::scheduler::Scheduler;
use crate::ai::QuotaLedger;
use crate::types::{Priority, TidyError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub enqueued: usize,
    /// Due zones held back by the quota plan
    pub deferred: usize,
    /// Rejected by backpressure
    pub rejected: usize,
    pub expired_cache_entries: usize,
}

pub struct ZoneTicker {
    scheduler: Arc<Scheduler>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<AnalysisCache>,
    interval: Duration,
}

impl ZoneTicker {
    pub fn new(
        scheduler: Arc<Scheduler>,
        ledger: Arc<QuotaLedger>,
        cache: Arc<AnalysisCache>,
        interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            ledger,
            cache,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Enabled zones past their interval with nothing pending, most overdue first
    pub fn due_zones(&self, now: DateTime<Utc>) -> Vec<String> {
        let board = self.scheduler.status_board();
        let mut due: Vec<(Option<DateTime<Utc>>, String)> = self
            .scheduler
            .zones()
            .into_iter()
            .filter(|zone| zone.enabled && zone.interval_secs > 0)
            .filter(|zone| !self.scheduler.is_pending(&zone.name))
            .filter_map(|zone| {
                let last_run = board.get(&zone.name).and_then(|s| s.last_run);
                let elapsed = last_run.map(|t| (now - t).num_seconds().max(0) as u64);
                match elapsed {
                    Some(secs) if secs < zone.interval_secs => None,
                    _ => Some((last_run, zone.name)),
                }
            })
            .collect();
        // Never-run zones (None) sort first
        due.sort();
        due.into_iter().map(|(_, name)| name).collect()
    }

    pub fn tick(&self) -> TickReport {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.due_zones(now);
        let plan = self.ledger.plan(due.len());
        let allowed = plan.proceed_now().min(due.len());

        let mut report = TickReport {
            due: due.len(),
            deferred: due.len() - allowed,
            ..TickReport::default()
        };

        for zone in due.iter().take(allowed) {
            match self.scheduler.enqueue(zone, Priority::Scheduled) {
                Ok(_) => report.enqueued += 1,
                Err(TidyError::QueueFull { .. }) => report.rejected += 1,
                Err(e) => warn!(zone = %zone, error = %e, "Scheduled analysis not enqueued"),
            }
        }

        report.expired_cache_entries = self.cache.cleanup_expired();

        if report.due > 0 {
            info!(
                due = report.due,
                enqueued = report.enqueued,
                deferred = report.deferred,
                rejected = report.rejected,
                "Tick"
            );
        }
        report
    }

    /// Tick until cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_secs = self.interval.as_secs(), "Ticker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.scheduler.is_accepting() {
                        break;
                    }
                    self.tick();
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("Ticker stopped");
    }
}

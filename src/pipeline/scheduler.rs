//! Zone Analysis Scheduler
//!
//! A single priority queue feeding a fixed pool of worker tasks.
//!
//! - dequeue order is Manual > Triggered > Scheduled, FIFO within a class
//! - a zone with a request in `Processing` is skipped at dequeue, so one zone
//!   never has two analyses running
//! - failed requests stay `Failed`; a follow-up request is enqueued after an
//!   exponential backoff while attempts remain
//! - `shutdown` cancels queued work, gives workers a grace period, then aborts
//!
//! Workers park on a `Notify` registered before they look at the queue, so a
//! wakeup sent between the check and the wait is never lost. A drop guard
//! settles any request whose worker is aborted mid-analysis.

use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analyzer::ZoneAnalyzer;
use super::queue::RequestQueue;
use super::status::ZoneStatusBoard;
use crate::ai::SharedMetrics;
use crate::config::SchedulerConfig;
use crate::constants::scheduler::{BACKOFF_FACTOR, MAX_TRACKED_REQUESTS};
use crate::services::{SharedTelemetry, TelemetryEvent};
use crate::storage::{RunRecord, SharedDatabase};
use crate::types::{
    AnalysisRequest, FailureRecord, Priority, ProviderAttempt, RequestId, RequestOutcome,
    RequestState, Result, TidyError, ZoneConfig,
};

const INTERRUPTED: &str = "interrupted";
const ZONE_GONE: &str = "zone no longer configured";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub workers: usize,
    pub queued: usize,
    pub processing: usize,
    pub pending_retries: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued requests cancelled
    pub cancelled: usize,
    /// In-flight requests aborted after the grace period
    pub interrupted: usize,
}

struct Tracked {
    request: AnalysisRequest,
    outcome: Option<RequestOutcome>,
}

struct State {
    accepting: bool,
    queue: RequestQueue,
    processing_zones: HashSet<String>,
    zones: HashMap<String, ZoneConfig>,
    requests: HashMap<RequestId, Tracked>,
    /// Terminal request ids, oldest first
    settled: VecDeque<RequestId>,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl State {
    fn new(zones: &[ZoneConfig]) -> Self {
        Self {
            accepting: true,
            queue: RequestQueue::new(),
            processing_zones: HashSet::new(),
            zones: zone_map(zones),
            requests: HashMap::new(),
            settled: VecDeque::new(),
            completed: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    /// Pop the next runnable request with the zone configuration it will run
    /// against. The zone is `None` if it was dropped while the request waited.
    fn next_ready(&mut self) -> Option<(AnalysisRequest, Option<ZoneConfig>)> {
        let busy = &self.processing_zones;
        let mut request = self.queue.pop_ready(|zone| busy.contains(zone))?;
        request.state = RequestState::Processing;
        self.processing_zones.insert(request.zone.clone());
        if let Some(tracked) = self.requests.get_mut(&request.id) {
            tracked.request.state = RequestState::Processing;
        }
        let zone = self.zones.get(&request.zone).cloned();
        Some((request, zone))
    }

    /// Move a request to its terminal state. `None` if it was already terminal.
    fn settle(&mut self, id: &RequestId, outcome: &RequestOutcome) -> Option<AnalysisRequest> {
        let tracked = self.requests.get_mut(id)?;
        if tracked.request.state.is_terminal() {
            return None;
        }
        if tracked.request.state == RequestState::Processing {
            self.processing_zones.remove(&tracked.request.zone);
        }
        tracked.request.state = outcome.state();
        tracked.outcome = Some(outcome.clone());
        let request = tracked.request.clone();

        match outcome.state() {
            RequestState::Completed => self.completed += 1,
            RequestState::Failed => self.failed += 1,
            _ => self.cancelled += 1,
        }

        self.settled.push_back(id.clone());
        while self.settled.len() > MAX_TRACKED_REQUESTS {
            if let Some(oldest) = self.settled.pop_front() {
                self.requests.remove(&oldest);
            }
        }
        Some(request)
    }
}

fn zone_map(zones: &[ZoneConfig]) -> HashMap<String, ZoneConfig> {
    zones.iter().map(|z| (z.name.clone(), z.clone())).collect()
}

struct Inner {
    state: Mutex<State>,
    work: Notify,
    settled: Notify,
    shutdown: CancellationToken,
    pending_retries: AtomicUsize,
    analyzer: Arc<ZoneAnalyzer>,
    status: Arc<ZoneStatusBoard>,
    telemetry: SharedTelemetry,
    metrics: SharedMetrics,
    database: Option<SharedDatabase>,
    config: SchedulerConfig,
}

/// Settles its request as failed if dropped while still armed
struct ProcessingGuard {
    inner: Arc<Inner>,
    request: Option<AnalysisRequest>,
}

impl ProcessingGuard {
    fn disarm(&mut self) {
        self.request = None;
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            warn!(
                request_id = %request.id.short(),
                zone = %request.zone,
                "Analysis interrupted before completion"
            );
            self.inner.finish(
                &request,
                &RequestOutcome::Failed(FailureRecord {
                    error: INTERRUPTED.to_string(),
                    attempts: Vec::new(),
                    retry_scheduled: false,
                }),
                &[],
            );
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Board and telemetry updates happen under the state lock so a zone's
    /// published status follows the order its requests change state.
    fn submit(&self, request: AnalysisRequest, is_retry: bool) -> Result<RequestId> {
        {
            let mut state = self.lock();
            if !state.accepting {
                return Err(TidyError::ShuttingDown);
            }
            match state.zones.get(&request.zone).map(|z| z.enabled) {
                None => return Err(TidyError::ZoneNotConfigured(request.zone)),
                Some(false) => return Err(TidyError::ZoneDisabled(request.zone)),
                Some(true) => {}
            }
            let depth = state.queue.len();
            if !is_retry && request.priority.is_sheddable() && depth >= self.config.queue_limit {
                return Err(TidyError::QueueFull {
                    depth,
                    limit: self.config.queue_limit,
                });
            }
            state.requests.insert(
                request.id.clone(),
                Tracked {
                    request: request.clone(),
                    outcome: None,
                },
            );
            self.status.mark_queued(&request.zone, &request.id);
            self.telemetry.emit(TelemetryEvent::Enqueued {
                request_id: request.id.clone(),
                zone: request.zone.clone(),
                priority: request.priority,
            });
            state.queue.push(request.clone());
        }

        debug!(
            request_id = %request.id.short(),
            zone = %request.zone,
            priority = %request.priority,
            attempt = request.attempt,
            "Request queued"
        );
        self.work.notify_one();
        Ok(request.id)
    }

    /// Pop the next runnable request and publish that it started
    fn dequeue(&self) -> Option<(AnalysisRequest, Option<ZoneConfig>)> {
        let mut state = self.lock();
        let (request, zone) = state.next_ready()?;
        self.status.mark_processing(&request.zone, &request.id);
        self.telemetry.emit(TelemetryEvent::Started {
            request_id: request.id.clone(),
            zone: request.zone.clone(),
            attempt: request.attempt,
        });
        Some((request, zone))
    }

    async fn execute(self: &Arc<Self>, request: AnalysisRequest, zone: Option<ZoneConfig>) {
        let mut guard = ProcessingGuard {
            inner: Arc::clone(self),
            request: Some(request.clone()),
        };

        let Some(zone) = zone else {
            guard.disarm();
            self.finish(
                &request,
                &RequestOutcome::Failed(FailureRecord {
                    error: ZONE_GONE.to_string(),
                    attempts: Vec::new(),
                    retry_scheduled: false,
                }),
                &[],
            );
            return;
        };

        let started = Instant::now();
        let run = AssertUnwindSafe(self.analyzer.analyze(&zone, request.priority))
            .catch_unwind()
            .await;
        guard.disarm();

        match run {
            Ok(Ok(mut report)) => {
                report.result.metadata.latency_ms = started.elapsed().as_millis() as u64;
                self.finish(
                    &request,
                    &RequestOutcome::Completed(Box::new(report.result)),
                    &report.attempts,
                );
            }
            Ok(Err(err)) => {
                let attempts = match &err {
                    TidyError::AllProvidersExhausted { attempts } => attempts.clone(),
                    _ => Vec::new(),
                };
                let outcome = self.fail(&request, err.to_string(), attempts);
                self.finish(&request, &outcome, &[]);
            }
            Err(_) => {
                let outcome = self.fail(&request, "analysis panicked".to_string(), Vec::new());
                self.finish(&request, &outcome, &[]);
            }
        }
    }

    fn fail(
        self: &Arc<Self>,
        request: &AnalysisRequest,
        error: String,
        attempts: Vec<ProviderAttempt>,
    ) -> RequestOutcome {
        let retry = request.attempt < self.config.max_retries && !self.shutdown.is_cancelled();
        let chain = attempts
            .iter()
            .map(|a| format!("{}={}", a.provider, a.outcome))
            .collect::<Vec<_>>()
            .join(" -> ");
        warn!(
            request_id = %request.id.short(),
            zone = %request.zone,
            attempt = request.attempt,
            chain = %chain,
            retry,
            error = %error,
            "Analysis failed"
        );

        if retry {
            self.schedule_retry(request.retry(), self.backoff(request.attempt));
        }

        RequestOutcome::Failed(FailureRecord {
            error,
            attempts,
            retry_scheduled: retry,
        })
    }

    /// Exponential delay capped at the configured maximum, plus up to 25% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.config.retry_base_delay_ms as f64
            * f64::from(BACKOFF_FACTOR).powi(attempt.min(16) as i32);
        let capped = exp.min(self.config.retry_max_delay_secs as f64 * 1_000.0);
        let jitter = rand::rng().random_range(0.0..=capped * 0.25);
        Duration::from_millis((capped + jitter) as u64)
    }

    fn schedule_retry(self: &Arc<Self>, retry: AnalysisRequest, delay: Duration) {
        let inner = Arc::clone(self);
        self.pending_retries.fetch_add(1, Ordering::SeqCst);
        debug!(zone = %retry.zone, attempt = retry.attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = inner.submit(retry, true) {
                        debug!(error = %e, "Retry not enqueued");
                    }
                }
                _ = inner.shutdown.cancelled() => debug!("Retry dropped at shutdown"),
            }
            inner.pending_retries.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Record a terminal outcome and publish it. Later calls for the same
    /// request are ignored.
    fn finish(&self, request: &AnalysisRequest, outcome: &RequestOutcome, attempts: &[ProviderAttempt]) {
        let settled = {
            let mut state = self.lock();
            let Some(settled) = state.settle(&request.id, outcome) else {
                return;
            };
            self.publish(&settled, outcome, state.zones.contains_key(&settled.zone));
            settled
        };

        let fallback = outcome.result().is_some_and(|r| r.is_fallback());
        self.metrics.record_outcome(outcome.state(), fallback);
        self.archive(&settled, outcome, attempts);

        self.settled.notify_waiters();
        self.work.notify_waiters();
    }

    /// Board update and telemetry for a terminal outcome. Zones removed while
    /// their request ran keep no board entry.
    fn publish(&self, settled: &AnalysisRequest, outcome: &RequestOutcome, zone_known: bool) {
        match outcome {
            RequestOutcome::Completed(result) => {
                if zone_known {
                    self.status.mark_completed(&settled.zone, &settled.id, result);
                }
                self.telemetry.emit(TelemetryEvent::Completed {
                    request_id: settled.id.clone(),
                    zone: settled.zone.clone(),
                    provider: result.metadata.provider.clone(),
                    cache_hit: result.metadata.cache_hit,
                    latency_ms: result.metadata.latency_ms,
                });
            }
            RequestOutcome::Failed(failure) => {
                if zone_known {
                    self.status.mark_failed(&settled.zone, &settled.id, &failure.error);
                }
                self.telemetry.emit(TelemetryEvent::Failed {
                    request_id: settled.id.clone(),
                    zone: settled.zone.clone(),
                    error: failure.error.clone(),
                    attempts: failure.attempts.clone(),
                });
            }
            RequestOutcome::Cancelled { reason } => {
                if zone_known {
                    self.status.mark_cancelled(&settled.zone, &settled.id);
                }
                self.telemetry.emit(TelemetryEvent::Cancelled {
                    request_id: settled.id.clone(),
                    zone: settled.zone.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    fn archive(&self, request: &AnalysisRequest, outcome: &RequestOutcome, attempts: &[ProviderAttempt]) {
        let Some(db) = &self.database else {
            return;
        };

        let (result, error, attempts) = match outcome {
            RequestOutcome::Completed(result) => (Some(result.as_ref()), None, attempts),
            RequestOutcome::Failed(failure) => (None, Some(failure.error.clone()), failure.attempts.as_slice()),
            RequestOutcome::Cancelled { reason } => (None, Some(reason.clone()), attempts),
        };

        let record = RunRecord {
            request_id: request.id.to_string(),
            zone: request.zone.clone(),
            priority: request.priority.to_string(),
            state: outcome.state().to_string(),
            attempt: request.attempt,
            retry_of: request.retry_of.as_ref().map(ToString::to_string),
            provider: result.and_then(|r| r.metadata.provider.clone()),
            cache_hit: result.is_some_and(|r| r.metadata.cache_hit),
            fallback: result.is_some_and(|r| r.is_fallback()),
            score: result.filter(|r| !r.is_fallback()).map(|r| r.cleanliness.score),
            error,
            attempts_json: serde_json::to_string(attempts).unwrap_or_else(|_| "[]".to_string()),
            enqueued_at: request.enqueued_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = db.archive_run(&record) {
            warn!(request_id = %request.id.short(), error = %e, "Failed to archive run");
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, worker: usize) {
    debug!(worker, "Worker started");
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        let notified = inner.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match inner.dequeue() {
            Some((request, zone)) => inner.execute(request, zone).await,
            None => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = inner.shutdown.cancelled() => break,
                }
            }
        }
    }
    debug!(worker, "Worker stopped");
}

pub struct Scheduler {
    inner: Arc<Inner>,
    workers: Mutex<JoinSet<()>>,
    worker_count: usize,
}

impl Scheduler {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        zones: &[ZoneConfig],
        analyzer: Arc<ZoneAnalyzer>,
        status: Arc<ZoneStatusBoard>,
        telemetry: SharedTelemetry,
        metrics: SharedMetrics,
        database: Option<SharedDatabase>,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let inner = Arc::new(Inner {
            state: Mutex::new(State::new(zones)),
            work: Notify::new(),
            settled: Notify::new(),
            shutdown: CancellationToken::new(),
            pending_retries: AtomicUsize::new(0),
            analyzer,
            status,
            telemetry,
            metrics,
            database,
            config,
        });

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            workers.spawn(worker_loop(Arc::clone(&inner), worker));
        }
        info!(workers = worker_count, zones = zones.len(), "Scheduler started");

        Self {
            inner,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    pub fn enqueue(&self, zone: &str, priority: Priority) -> Result<RequestId> {
        self.inner.submit(AnalysisRequest::new(zone, priority), false)
    }

    /// Resolve once the request is terminal
    pub async fn wait(&self, id: &RequestId, timeout: Duration) -> Result<RequestOutcome> {
        let waiting = async {
            loop {
                let notified = self.inner.settled.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let current = self.inner.lock().requests.get(id).map(|t| t.outcome.clone());
                match current {
                    None => return Err(TidyError::UnknownRequest(id.to_string())),
                    Some(Some(outcome)) => return Ok(outcome),
                    Some(None) => notified.await,
                }
            }
        };

        tokio::time::timeout(timeout, waiting)
            .await
            .unwrap_or_else(|_| Err(TidyError::timeout(format!("waiting for request {}", id), timeout)))
    }

    pub fn request(&self, id: &RequestId) -> Option<AnalysisRequest> {
        self.inner.lock().requests.get(id).map(|t| t.request.clone())
    }

    pub fn outcome(&self, id: &RequestId) -> Option<RequestOutcome> {
        self.inner
            .lock()
            .requests
            .get(id)
            .and_then(|t| t.outcome.clone())
    }

    /// Retry request created for a failed request, once it has been enqueued
    pub fn follow_up(&self, id: &RequestId) -> Option<RequestId> {
        self.inner
            .lock()
            .requests
            .values()
            .find(|t| t.request.retry_of.as_ref() == Some(id))
            .map(|t| t.request.id.clone())
    }

    /// Zone has a queued or processing request
    pub fn is_pending(&self, zone: &str) -> bool {
        let state = self.inner.lock();
        state.processing_zones.contains(zone) || state.queue.has_zone(zone)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.lock().accepting
    }

    pub fn zones(&self) -> Vec<ZoneConfig> {
        let mut zones: Vec<ZoneConfig> = self.inner.lock().zones.values().cloned().collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        zones
    }

    pub fn status_board(&self) -> &Arc<ZoneStatusBoard> {
        &self.inner.status
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.lock();
        SchedulerStats {
            workers: self.worker_count,
            queued: state.queue.len(),
            processing: state.processing_zones.len(),
            pending_retries: self.inner.pending_retries.load(Ordering::SeqCst),
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
        }
    }

    /// Drop a zone and cancel its queued requests; returns how many were cancelled
    pub fn remove_zone(&self, name: &str) -> usize {
        let cancelled = {
            let mut state = self.inner.lock();
            state.zones.remove(name);
            state.queue.remove_where(|r| r.zone == name)
        };
        self.cancel_all(&cancelled, "zone removed");
        self.inner.status.remove(name);
        info!(zone = name, cancelled = cancelled.len(), "Zone removed");
        cancelled.len()
    }

    /// Replace the zone set; queued requests for zones no longer present are
    /// cancelled. Returns how many were cancelled.
    pub fn reload_zones(&self, zones: &[ZoneConfig]) -> usize {
        let (cancelled, removed) = {
            let mut state = self.inner.lock();
            let next = zone_map(zones);
            let removed: Vec<String> = state
                .zones
                .keys()
                .filter(|name| !next.contains_key(*name))
                .cloned()
                .collect();
            let cancelled = state.queue.remove_where(|r| !next.contains_key(&r.zone));
            state.zones = next;
            (cancelled, removed)
        };

        self.cancel_all(&cancelled, "zone removed");
        for name in &removed {
            self.inner.status.remove(name);
        }
        for zone in zones {
            self.inner.status.ensure(&zone.name);
        }
        info!(
            zones = zones.len(),
            removed = removed.len(),
            cancelled = cancelled.len(),
            "Zones reloaded"
        );
        cancelled.len()
    }

    fn cancel_all(&self, requests: &[AnalysisRequest], reason: &str) {
        for request in requests {
            self.inner.finish(
                request,
                &RequestOutcome::Cancelled {
                    reason: reason.to_string(),
                },
                &[],
            );
        }
    }

    /// Stop accepting work, cancel the queue, and wait up to `grace` for
    /// in-flight analyses before aborting them
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let drained = {
            let mut state = self.inner.lock();
            state.accepting = false;
            state.queue.drain()
        };
        self.inner.shutdown.cancel();
        self.cancel_all(&drained, "scheduler shutting down");

        let mut workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let joined = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        let mut interrupted = 0;
        if joined.is_err() {
            interrupted = self.inner.lock().processing_zones.len();
            warn!(interrupted, grace_secs = grace.as_secs(), "Grace period elapsed, aborting analyses");
            workers.shutdown().await;
        }

        info!(cancelled = drained.len(), interrupted, "Scheduler stopped");
        ShutdownReport {
            cancelled: drained.len(),
            interrupted,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::{
        PipelineMetrics, ProviderOrchestrator, ProviderSlot, QuotaLedger, ScriptedProvider,
        ScriptedReply, VisionProvider, sample_analysis,
    };
    use crate::config::{CacheConfig, ProviderConfig, ProviderKind, QuotaConfig};
    use crate::pipeline::AnalysisCache;
    use crate::services::{InMemoryTaskList, MemoryTelemetry, StaticCapture};
    use crate::storage::Database;
    use crate::types::{ProviderErrorKind, ZoneRunStatus};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(120);

    pub(crate) struct Harness {
        pub(crate) scheduler: Scheduler,
        pub(crate) provider: Arc<ScriptedProvider>,
        pub(crate) telemetry: Arc<MemoryTelemetry>,
    }

    pub(crate) fn zone(name: &str) -> ZoneConfig {
        ZoneConfig::new(name, format!("cam-{}", name), name)
    }

    pub(crate) fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            queue_limit: 8,
            max_retries: 0,
            retry_base_delay_ms: 100,
            retry_max_delay_secs: 1,
            shutdown_grace_secs: 5,
            tick_interval_secs: 30,
        }
    }

    pub(crate) fn slow(secs: u64) -> ScriptedProvider {
        ScriptedProvider::new(
            "vision",
            ScriptedReply::ok(sample_analysis(80, &[], &[])).with_delay(Duration::from_secs(secs)),
        )
    }

    pub(crate) fn harness_with(
        provider: ScriptedProvider,
        config: SchedulerConfig,
        zones: Vec<ZoneConfig>,
        database: Option<SharedDatabase>,
    ) -> Harness {
        let provider = Arc::new(provider);
        let metrics = PipelineMetrics::shared();
        let slot = ProviderSlot::new(
            ProviderConfig::new(provider.name(), ProviderKind::Mock)
                .with_timeout(600)
                .with_max_concurrent(8),
            provider.clone(),
        );
        let orchestrator = Arc::new(ProviderOrchestrator::new(
            vec![slot],
            Arc::new(QuotaLedger::new(Vec::new(), QuotaConfig::default())),
            metrics.clone(),
        ));

        let capture = zones.iter().fold(StaticCapture::new(), |capture, z| {
            capture.with_image(z.camera.clone(), z.name.as_bytes().to_vec())
        });
        let cache = AnalysisCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let analyzer = Arc::new(ZoneAnalyzer::new(
            Arc::new(capture),
            Arc::new(InMemoryTaskList::new()),
            orchestrator,
            Arc::new(cache),
        ));

        let telemetry = Arc::new(MemoryTelemetry::new());
        let status = Arc::new(ZoneStatusBoard::in_memory(&zones));
        let scheduler = Scheduler::start(
            config,
            &zones,
            analyzer,
            status,
            telemetry.clone(),
            metrics,
            database,
        );

        Harness {
            scheduler,
            provider,
            telemetry,
        }
    }

    pub(crate) fn harness(provider: ScriptedProvider, config: SchedulerConfig, zones: &[&str]) -> Harness {
        harness_with(provider, config, zones.iter().map(|z| zone(z)).collect(), None)
    }

    fn started_zones(telemetry: &MemoryTelemetry) -> Vec<String> {
        telemetry
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Started { zone, .. } => Some(zone),
                _ => None,
            })
            .collect()
    }

    /// Let spawned workers pick up what is queued
    async fn settle_workers() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_every_request_completes() {
        let h = harness(ScriptedProvider::canned("vision"), config(2), &["a", "b", "c"]);

        let ids: Vec<RequestId> = ["a", "b", "c"]
            .iter()
            .map(|z| h.scheduler.enqueue(z, Priority::Triggered).unwrap())
            .collect();

        for id in &ids {
            let outcome = h.scheduler.wait(id, WAIT).await.unwrap();
            assert_eq!(outcome.state(), RequestState::Completed);
            assert_eq!(outcome.result().unwrap().cleanliness.score, 85);
        }

        let stats = h.scheduler.stats();
        assert_eq!(stats.completed, 3);
        assert_eq!((stats.queued, stats.processing), (0, 0));
        assert_eq!(h.telemetry.count("analysis.completed"), 3);
        assert_eq!(
            h.scheduler.status_board().get("b").unwrap().score,
            Some(85)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_follows_priority() {
        let h = harness(slow(1), config(1), &["blocker", "s", "t", "m"]);

        let blocker = h.scheduler.enqueue("blocker", Priority::Manual).unwrap();
        settle_workers().await;
        let s = h.scheduler.enqueue("s", Priority::Scheduled).unwrap();
        let t = h.scheduler.enqueue("t", Priority::Triggered).unwrap();
        let m = h.scheduler.enqueue("m", Priority::Manual).unwrap();

        for id in [&blocker, &s, &t, &m] {
            h.scheduler.wait(id, WAIT).await.unwrap();
        }
        assert_eq!(started_zones(&h.telemetry), vec!["blocker", "m", "t", "s"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_zone_never_runs_concurrently() {
        let h = harness(slow(1), config(3), &["kitchen"]);

        let ids: Vec<RequestId> = (0..3)
            .map(|_| h.scheduler.enqueue("kitchen", Priority::Manual).unwrap())
            .collect();
        for id in &ids {
            assert_eq!(
                h.scheduler.wait(id, WAIT).await.unwrap().state(),
                RequestState::Completed
            );
        }

        assert_eq!(h.provider.calls(), 3);
        assert_eq!(h.provider.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_zones_run_in_parallel() {
        let h = harness(slow(1), config(2), &["kitchen", "garage"]);

        let a = h.scheduler.enqueue("kitchen", Priority::Manual).unwrap();
        let b = h.scheduler.enqueue("garage", Priority::Manual).unwrap();
        h.scheduler.wait(&a, WAIT).await.unwrap();
        h.scheduler.wait(&b, WAIT).await.unwrap();

        assert_eq!(h.provider.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_sheds_only_scheduled() {
        let mut cfg = config(1);
        cfg.queue_limit = 2;
        let h = harness(slow(5), cfg, &["a", "b", "c", "d"]);

        h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;
        h.scheduler.enqueue("b", Priority::Scheduled).unwrap();
        h.scheduler.enqueue("c", Priority::Scheduled).unwrap();

        let err = h.scheduler.enqueue("d", Priority::Scheduled).unwrap_err();
        assert!(matches!(err, TidyError::QueueFull { depth: 2, limit: 2 }));
        assert!(h.scheduler.enqueue("d", Priority::Triggered).is_ok());
        assert!(h.scheduler.enqueue("d", Priority::Manual).is_ok());
        assert_eq!(h.scheduler.stats().queued, 4);
    }

    #[tokio::test]
    async fn test_rejects_unknown_and_disabled_zones() {
        let h = harness_with(
            ScriptedProvider::canned("vision"),
            config(1),
            vec![zone("kitchen"), zone("attic").disabled()],
            None,
        );

        assert!(matches!(
            h.scheduler.enqueue("ghost", Priority::Manual),
            Err(TidyError::ZoneNotConfigured(_))
        ));
        assert!(matches!(
            h.scheduler.enqueue("attic", Priority::Manual),
            Err(TidyError::ZoneDisabled(_))
        ));
        assert_eq!(h.telemetry.count("analysis.enqueued"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queue_and_aborts_stragglers() {
        let h = harness(slow(100), config(1), &["a", "b", "c"]);

        let a = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;
        let b = h.scheduler.enqueue("b", Priority::Manual).unwrap();
        let c = h.scheduler.enqueue("c", Priority::Scheduled).unwrap();

        let report = h.scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport { cancelled: 2, interrupted: 1 });

        match h.scheduler.outcome(&a).unwrap() {
            RequestOutcome::Failed(failure) => assert_eq!(failure.error, INTERRUPTED),
            other => panic!("unexpected outcome: {other:?}"),
        }
        for id in [&b, &c] {
            assert_eq!(h.scheduler.outcome(id).unwrap().state(), RequestState::Cancelled);
        }
        assert!(matches!(
            h.scheduler.enqueue("a", Priority::Manual),
            Err(TidyError::ShuttingDown)
        ));
        assert_eq!(h.telemetry.count("analysis.cancelled"), 2);
        assert_eq!(h.scheduler.stats().processing, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_work_finish() {
        let h = harness(slow(2), config(1), &["a"]);

        let a = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;

        let report = h.scheduler.shutdown(Duration::from_secs(30)).await;
        assert_eq!(report, ShutdownReport::default());
        assert_eq!(h.scheduler.outcome(&a).unwrap().state(), RequestState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_linked_retry() {
        let mut cfg = config(1);
        cfg.max_retries = 1;
        let h = harness(
            ScriptedProvider::failing("vision", ProviderErrorKind::Unavailable),
            cfg,
            &["a"],
        );

        let first = h.scheduler.enqueue("a", Priority::Triggered).unwrap();
        match h.scheduler.wait(&first, WAIT).await.unwrap() {
            RequestOutcome::Failed(failure) => {
                assert!(failure.retry_scheduled);
                assert_eq!(failure.attempts.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        let retry = h.scheduler.follow_up(&first).unwrap();
        match h.scheduler.wait(&retry, WAIT).await.unwrap() {
            RequestOutcome::Failed(failure) => assert!(!failure.retry_scheduled),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let request = h.scheduler.request(&retry).unwrap();
        assert_eq!(request.attempt, 1);
        assert_eq!(request.retry_of, Some(first));
        assert_eq!(h.scheduler.stats().failed, 2);
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_unknown_and_timeout() {
        let h = harness(slow(100), config(1), &["a"]);

        assert!(matches!(
            h.scheduler.wait(&RequestId::new("nope"), WAIT).await,
            Err(TidyError::UnknownRequest(_))
        ));

        let id = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        assert!(matches!(
            h.scheduler.wait(&id, Duration::from_secs(1)).await,
            Err(TidyError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_zone_cancels_its_queue() {
        let h = harness(slow(10), config(1), &["a", "b"]);

        h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;
        let b1 = h.scheduler.enqueue("b", Priority::Triggered).unwrap();
        let b2 = h.scheduler.enqueue("b", Priority::Scheduled).unwrap();

        assert_eq!(h.scheduler.remove_zone("b"), 2);
        for id in [&b1, &b2] {
            assert_eq!(h.scheduler.outcome(id).unwrap().state(), RequestState::Cancelled);
        }
        assert!(matches!(
            h.scheduler.enqueue("b", Priority::Manual),
            Err(TidyError::ZoneNotConfigured(_))
        ));
        assert!(h.scheduler.status_board().get("b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_zones_cancels_removed() {
        let h = harness(slow(10), config(1), &["a", "b"]);

        h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;
        let b = h.scheduler.enqueue("b", Priority::Manual).unwrap();

        let cancelled = h.scheduler.reload_zones(&[zone("a"), zone("c")]);
        assert_eq!(cancelled, 1);
        assert_eq!(h.scheduler.outcome(&b).unwrap().state(), RequestState::Cancelled);
        assert!(h.scheduler.enqueue("c", Priority::Manual).is_ok());
        let names: Vec<String> = h.scheduler.zones().into_iter().map(|z| z.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_unreadable_answer_completes_with_fallback() {
        let h = harness(
            ScriptedProvider::new("vision", ScriptedReply::ok(json!("not an object"))),
            config(1),
            &["a"],
        );

        let id = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        let outcome = h.scheduler.wait(&id, WAIT).await.unwrap();
        assert!(outcome.result().unwrap().is_fallback());

        let status = h.scheduler.status_board().get("a").unwrap();
        assert_eq!(status.score, None);
    }

    #[tokio::test]
    async fn test_terminal_requests_are_archived() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let h = harness_with(
            ScriptedProvider::canned("vision"),
            config(1),
            vec![zone("a")],
            Some(db.clone()),
        );

        let id = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        h.scheduler.wait(&id, WAIT).await.unwrap();

        let runs = db.recent_runs(Some("a"), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].request_id, id.to_string());
        assert_eq!(runs[0].state, "completed");
        assert_eq!(runs[0].score, Some(85));
        assert_eq!(runs[0].provider.as_deref(), Some("vision"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_status_follows_request_lifecycle() {
        let names: Vec<String> = (0..12).map(|i| format!("zone-{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut config = config(4);
        config.queue_limit = 64;
        let h = Arc::new(harness(ScriptedProvider::canned("vision"), config, &refs));

        let mut submitters = tokio::task::JoinSet::new();
        for name in names.clone() {
            let h = Arc::clone(&h);
            submitters.spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..3 {
                    ids.push(h.scheduler.enqueue(&name, Priority::Manual).unwrap());
                    tokio::task::yield_now().await;
                }
                ids
            });
        }
        let mut ids = Vec::new();
        while let Some(batch) = submitters.join_next().await {
            ids.extend(batch.unwrap());
        }
        for id in &ids {
            assert_eq!(h.scheduler.wait(id, WAIT).await.unwrap().state(), RequestState::Completed);
        }

        for name in &names {
            let status = h.scheduler.status_board().get(name).unwrap();
            assert_eq!(status.status, ZoneRunStatus::Completed, "zone {}", name);
        }

        let events = h.telemetry.events();
        let position = |id: &RequestId, wanted: &str| {
            events
                .iter()
                .position(|event| {
                    event.name() == wanted
                        && match event {
                            TelemetryEvent::Enqueued { request_id, .. }
                            | TelemetryEvent::Started { request_id, .. }
                            | TelemetryEvent::Completed { request_id, .. } => request_id == id,
                            _ => false,
                        }
                })
                .unwrap()
        };
        for id in &ids {
            let queued = position(id, "analysis.enqueued");
            let started = position(id, "analysis.started");
            let completed = position(id, "analysis.completed");
            assert!(queued < started && started < completed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zone_removed_mid_run_still_completes() {
        let h = harness(slow(5), config(1), &["a"]);

        let id = h.scheduler.enqueue("a", Priority::Manual).unwrap();
        settle_workers().await;
        assert_eq!(h.scheduler.remove_zone("a"), 0);

        let outcome = h.scheduler.wait(&id, WAIT).await.unwrap();
        assert_eq!(outcome.state(), RequestState::Completed);
        assert!(h.scheduler.status_board().get("a").is_none());
        assert_eq!(h.telemetry.count("analysis.cancelled"), 0);
    }
}

//! Provider Orchestrator
//!
//! Cascading provider attempts for one analysis.
//!
//! ## Strategy
//!
//! 1. Rank providers by priority (stable on config order)
//! 2. Skip disabled, already-failed and at-capacity providers
//! 3. Reserve a credential when the provider needs one; no key means skip
//! 4. Call with the provider's timeout and parse the answer
//! 5. On a fallback-eligible failure exclude the provider and repeat
//! 6. Stop on `BadRequest`, on a non-eligible provider, or when none remain
//!
//! When everything left is only at capacity, wait for a permit on the best
//! ranked provider, bounded by its timeout.
//!
//! ## Racing
//!
//! `DispatchMode::Race` sends the same request to the top K eligible
//! providers at once. The first success wins and the losers are recorded as
//! cancelled. If all of them fail, the sequential cascade continues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use super::{SharedProvider, VisionRequest, create_provider};
use crate::ai::metrics::SharedMetrics;
use crate::ai::quota::{KeyLease, QuotaLedger};
use crate::ai::response::parse_batch_result;
use crate::ai::timeout::with_provider_timeout;
use crate::config::{Config, OrchestratorConfig, ProviderConfig};
use crate::types::{
    AttemptOutcome, BatchAnalysisResult, Priority, ProviderAttempt, ProviderError,
    ProviderErrorKind, Result, TidyError,
};

/// A configured backend with its concurrency cap
pub struct ProviderSlot {
    pub config: ProviderConfig,
    pub backend: SharedProvider,
    permits: Arc<Semaphore>,
}

impl ProviderSlot {
    pub fn new(config: ProviderConfig, backend: SharedProvider) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            backend,
            permits,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Sequential,
    Race { top_k: usize },
}

/// Successful orchestration
#[derive(Debug, Clone)]
pub struct Orchestrated {
    pub result: BatchAnalysisResult,
    pub provider: String,
    pub attempts: Vec<ProviderAttempt>,
}

/// Every eligible provider was tried and none produced a result
#[derive(Debug, Clone)]
pub struct Exhausted {
    pub attempts: Vec<ProviderAttempt>,
}

impl Exhausted {
    pub fn any_malformed(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.failure_kind() == Some(ProviderErrorKind::MalformedResponse))
    }
}

impl From<Exhausted> for TidyError {
    fn from(exhausted: Exhausted) -> Self {
        TidyError::AllProvidersExhausted {
            attempts: exhausted.attempts,
        }
    }
}

/// Provider view for status output
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub name: String,
    pub kind: String,
    pub model: String,
    pub priority: u32,
    pub enabled: bool,
    pub in_flight: usize,
    pub max_concurrent: usize,
}

struct Dispatch {
    idx: usize,
    permit: OwnedSemaphorePermit,
    lease: Option<KeyLease>,
}

enum Selection {
    Ready(Dispatch),
    /// Nothing ready; best ranked provider that is only at capacity
    Capped(usize),
    Empty,
}

struct CallOutcome {
    attempt: ProviderAttempt,
    result: std::result::Result<BatchAnalysisResult, ProviderError>,
}

enum RaceOutcome {
    Won(Orchestrated),
    Stop,
    Continue,
}

pub struct ProviderOrchestrator {
    slots: Vec<ProviderSlot>,
    ledger: Arc<QuotaLedger>,
    metrics: SharedMetrics,
    config: OrchestratorConfig,
}

impl ProviderOrchestrator {
    pub fn new(mut slots: Vec<ProviderSlot>, ledger: Arc<QuotaLedger>, metrics: SharedMetrics) -> Self {
        slots.sort_by_key(|slot| slot.config.priority);
        Self {
            slots,
            ledger,
            metrics,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build slots for every configured provider
    pub fn from_config(
        config: &Config,
        ledger: Arc<QuotaLedger>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let slots = config
            .providers
            .iter()
            .map(|p| Ok(ProviderSlot::new(p.clone(), create_provider(p)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(slots, ledger, metrics).with_config(config.orchestrator.clone()))
    }

    /// Racing applies to manual requests only
    pub fn mode_for(&self, priority: Priority) -> DispatchMode {
        if self.config.racing_enabled && priority == Priority::Manual && self.config.race_top_k > 1
        {
            DispatchMode::Race {
                top_k: self.config.race_top_k,
            }
        } else {
            DispatchMode::Sequential
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn slot_statuses(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .map(|slot| SlotStatus {
                name: slot.config.name.clone(),
                kind: slot.config.kind.to_string(),
                model: slot.backend.model().to_string(),
                priority: slot.config.priority,
                enabled: slot.config.enabled,
                in_flight: slot.in_flight(),
                max_concurrent: slot.config.max_concurrent,
            })
            .collect()
    }

    #[instrument(skip(self, prompt, image), fields(providers = self.slots.len()))]
    pub async fn analyze(
        &self,
        prompt: &str,
        image: &[u8],
        mode: DispatchMode,
    ) -> std::result::Result<Orchestrated, Exhausted> {
        let mut excluded = HashSet::new();
        let mut attempts = Vec::new();

        if let DispatchMode::Race { top_k } = mode {
            match self
                .race(prompt, image, top_k, &mut excluded, &mut attempts)
                .await
            {
                RaceOutcome::Won(done) => return Ok(done),
                RaceOutcome::Stop => return Err(Exhausted { attempts }),
                RaceOutcome::Continue => {}
            }
        }

        loop {
            let dispatch = match self.select(&mut excluded) {
                Selection::Ready(dispatch) => dispatch,
                Selection::Capped(idx) => {
                    match self.wait_for_permit(idx, &mut excluded, &mut attempts).await {
                        Some(dispatch) => dispatch,
                        None => continue,
                    }
                }
                Selection::Empty => break,
            };

            let idx = dispatch.idx;
            let slot = &self.slots[idx];
            let outcome = self.invoke(dispatch, prompt, image).await;
            attempts.push(outcome.attempt);

            match outcome.result {
                Ok(result) => {
                    info!(
                        provider = %slot.name(),
                        attempts = attempts.len(),
                        "Analysis succeeded"
                    );
                    return Ok(Orchestrated {
                        result,
                        provider: slot.name().to_string(),
                        attempts,
                    });
                }
                Err(err) => {
                    excluded.insert(idx);
                    if !self.continues_after(slot, &err) {
                        warn!(provider = %slot.name(), kind = %err.kind, "Stopping provider chain");
                        break;
                    }
                }
            }
        }

        warn!(attempts = attempts.len(), "All providers exhausted");
        Err(Exhausted { attempts })
    }

    fn continues_after(&self, slot: &ProviderSlot, err: &ProviderError) -> bool {
        err.should_fallback() && slot.config.fallback_eligible
    }

    /// `Some(None)` when no credential is needed, `None` when one is needed
    /// and none is available
    fn credential_for(&self, slot: &ProviderSlot) -> Option<Option<KeyLease>> {
        if !slot.config.requires_key {
            return Some(None);
        }
        match self.ledger.reserve(slot.name()) {
            Some(lease) => Some(Some(lease)),
            None => {
                debug!(provider = %slot.name(), "No credential available, provider ineligible");
                None
            }
        }
    }

    fn select(&self, excluded: &mut HashSet<usize>) -> Selection {
        let mut capped = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.config.enabled || excluded.contains(&idx) {
                continue;
            }
            let Ok(permit) = slot.permits.clone().try_acquire_owned() else {
                debug!(provider = %slot.name(), "Provider at concurrency cap");
                capped.get_or_insert(idx);
                continue;
            };
            match self.credential_for(slot) {
                Some(lease) => return Selection::Ready(Dispatch { idx, permit, lease }),
                None => {
                    excluded.insert(idx);
                }
            }
        }
        capped.map_or(Selection::Empty, Selection::Capped)
    }

    async fn wait_for_permit(
        &self,
        idx: usize,
        excluded: &mut HashSet<usize>,
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<Dispatch> {
        let slot = &self.slots[idx];
        let timeout = slot.config.timeout();
        let start = Instant::now();
        debug!(provider = %slot.name(), "All eligible providers at capacity, waiting");

        match tokio::time::timeout(timeout, slot.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => match self.credential_for(slot) {
                Some(lease) => Some(Dispatch { idx, permit, lease }),
                None => {
                    excluded.insert(idx);
                    None
                }
            },
            _ => {
                excluded.insert(idx);
                let attempt = ProviderAttempt {
                    provider: slot.name().to_string(),
                    key_id: None,
                    outcome: AttemptOutcome::Failed(ProviderErrorKind::Timeout),
                    latency_ms: start.elapsed().as_millis() as u64,
                    message: Some("timed out waiting for a concurrency slot".to_string()),
                };
                self.metrics.record_attempt(&attempt, None);
                attempts.push(attempt);
                None
            }
        }
    }

    async fn invoke(&self, dispatch: Dispatch, prompt: &str, image: &[u8]) -> CallOutcome {
        let Dispatch { idx, permit, lease } = dispatch;
        let slot = &self.slots[idx];
        let name = slot.name();
        let timeout = slot.config.timeout();
        let start = Instant::now();

        let request = VisionRequest {
            prompt,
            image,
            credential: lease.as_ref().map(|l| &l.credential),
            timeout,
        };
        let reply = with_provider_timeout(name, timeout, slot.backend.submit(request)).await;
        drop(permit);
        let latency_ms = start.elapsed().as_millis() as u64;

        let (result, usage) = match reply {
            Ok(reply) => match parse_batch_result(&reply.content) {
                Ok(mut result) => {
                    result.metadata.provider = Some(name.to_string());
                    result.metadata.latency_ms = latency_ms;
                    (Ok(result), Some(reply.usage))
                }
                Err(e) => (Err(ProviderError::malformed(name, e)), None),
            },
            Err(e) => (Err(e), None),
        };

        if let Some(lease) = &lease {
            match &result {
                Ok(_) => self.ledger.record_success(&lease.key_id),
                Err(e) => self.ledger.record_error(&lease.key_id, e.kind),
            }
        }

        let attempt = ProviderAttempt {
            provider: name.to_string(),
            key_id: lease.map(|l| l.key_id),
            outcome: match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) => AttemptOutcome::Failed(e.kind),
            },
            latency_ms,
            message: result.as_ref().err().map(|e| e.message.clone()),
        };
        self.metrics.record_attempt(&attempt, usage);

        match &result {
            Ok(_) => debug!(provider = %name, latency_ms, "Provider attempt succeeded"),
            Err(e) => warn!(
                provider = %name,
                kind = %e.kind,
                latency_ms,
                error = %e.message,
                "Provider attempt failed"
            ),
        }

        CallOutcome { attempt, result }
    }

    async fn race(
        &self,
        prompt: &str,
        image: &[u8],
        top_k: usize,
        excluded: &mut HashSet<usize>,
        attempts: &mut Vec<ProviderAttempt>,
    ) -> RaceOutcome {
        let mut dispatches = Vec::new();
        while dispatches.len() < top_k {
            match self.select(excluded) {
                Selection::Ready(dispatch) => {
                    excluded.insert(dispatch.idx);
                    dispatches.push(dispatch);
                }
                Selection::Capped(_) | Selection::Empty => break,
            }
        }
        if dispatches.is_empty() {
            return RaceOutcome::Continue;
        }

        debug!(contenders = dispatches.len(), "Racing providers");
        let started = Instant::now();
        let mut pending: Vec<(usize, Option<String>)> = dispatches
            .iter()
            .map(|d| (d.idx, d.lease.as_ref().map(|l| l.key_id.clone())))
            .collect();

        let mut racing: FuturesUnordered<_> = dispatches
            .into_iter()
            .map(|dispatch| {
                let idx = dispatch.idx;
                async move { (idx, self.invoke(dispatch, prompt, image).await) }
            })
            .collect();

        let mut stop = false;
        loop {
            let Some((idx, outcome)) = racing.next().await else {
                break;
            };
            pending.retain(|(p, _)| *p != idx);
            attempts.push(outcome.attempt);

            match outcome.result {
                Ok(result) => {
                    drop(racing);
                    let latency_ms = started.elapsed().as_millis() as u64;
                    for (loser, key_id) in pending {
                        let attempt = ProviderAttempt {
                            provider: self.slots[loser].name().to_string(),
                            key_id,
                            outcome: AttemptOutcome::Cancelled,
                            latency_ms,
                            message: Some("lost race".to_string()),
                        };
                        self.metrics.record_attempt(&attempt, None);
                        attempts.push(attempt);
                    }
                    let provider = self.slots[idx].name().to_string();
                    info!(provider = %provider, "Race won");
                    return RaceOutcome::Won(Orchestrated {
                        result,
                        provider,
                        attempts: std::mem::take(attempts),
                    });
                }
                Err(err) => {
                    if !self.continues_after(&self.slots[idx], &err) {
                        stop = true;
                    }
                }
            }
        }

        if stop {
            RaceOutcome::Stop
        } else {
            debug!("Every raced provider failed, continuing sequentially");
            RaceOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::metrics::PipelineMetrics;
    use crate::ai::provider::scripted::{ScriptedProvider, ScriptedReply, sample_analysis};
    use crate::ai::quota::ApiKeyStatus;
    use crate::config::{ProviderKind, QuotaConfig};
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;

    fn cfg(name: &str, priority: u32) -> ProviderConfig {
        ProviderConfig::new(name, ProviderKind::Mock).with_priority(priority)
    }

    fn empty_ledger() -> Arc<QuotaLedger> {
        Arc::new(QuotaLedger::new(Vec::new(), QuotaConfig::default()))
    }

    fn orchestrator(slots: Vec<ProviderSlot>) -> ProviderOrchestrator {
        ProviderOrchestrator::new(slots, empty_ledger(), PipelineMetrics::shared())
    }

    #[tokio::test]
    async fn test_falls_back_after_timeout() {
        let a = Arc::new(ScriptedProvider::failing("a", ProviderErrorKind::Timeout));
        let b = Arc::new(ScriptedProvider::canned("b"));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("a", 1), a.clone()),
            ProviderSlot::new(cfg("b", 2), b.clone()),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "b");
        assert_eq!(done.attempts.len(), 2);
        assert_eq!(
            done.attempts[0].failure_kind(),
            Some(ProviderErrorKind::Timeout)
        );
        assert!(done.attempts[1].is_success());
        assert_eq!(done.result.metadata.provider.as_deref(), Some("b"));
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_hits_its_timeout() {
        let a = Arc::new(ScriptedProvider::new("a", ScriptedReply::hang()));
        let b = Arc::new(ScriptedProvider::canned("b"));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("a", 1).with_timeout(5), a),
            ProviderSlot::new(cfg("b", 2), b),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "b");
        assert_eq!(
            done.attempts[0].failure_kind(),
            Some(ProviderErrorKind::Timeout)
        );
    }

    #[tokio::test]
    async fn test_priority_ranking_ignores_config_order() {
        let low = Arc::new(ScriptedProvider::canned("low"));
        let high = Arc::new(ScriptedProvider::canned("high"));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("low", 10), low.clone()),
            ProviderSlot::new(cfg("high", 1), high.clone()),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "high");
        assert_eq!(low.calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_provider_skipped() {
        let mut disabled = cfg("a", 1);
        disabled.enabled = false;
        let a = Arc::new(ScriptedProvider::canned("a"));
        let orch = orchestrator(vec![
            ProviderSlot::new(disabled, a.clone()),
            ProviderSlot::new(cfg("b", 2), Arc::new(ScriptedProvider::canned("b"))),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "b");
        assert_eq!(done.attempts.len(), 1);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_request_stops_chain() {
        let b = Arc::new(ScriptedProvider::canned("b"));
        let orch = orchestrator(vec![
            ProviderSlot::new(
                cfg("a", 1),
                Arc::new(ScriptedProvider::failing("a", ProviderErrorKind::BadRequest)),
            ),
            ProviderSlot::new(cfg("b", 2), b.clone()),
        ]);

        let exhausted = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap_err();
        assert_eq!(exhausted.attempts.len(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_eligible_provider_stops_chain() {
        let mut a = cfg("a", 1);
        a.fallback_eligible = false;
        let orch = orchestrator(vec![
            ProviderSlot::new(
                a,
                Arc::new(ScriptedProvider::failing("a", ProviderErrorKind::Unavailable)),
            ),
            ProviderSlot::new(cfg("b", 2), Arc::new(ScriptedProvider::canned("b"))),
        ]);

        let err: TidyError = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap_err()
            .into();
        assert!(err.to_string().contains("a=failed:UNAVAILABLE"));
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back() {
        let a = Arc::new(ScriptedProvider::new(
            "a",
            ScriptedReply::ok(json!({"verdict": "looks fine"})),
        ));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("a", 1), a),
            ProviderSlot::new(cfg("b", 2), Arc::new(ScriptedProvider::canned("b"))),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "b");
        assert_eq!(
            done.attempts[0].failure_kind(),
            Some(ProviderErrorKind::MalformedResponse)
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_attempt() {
        let orch = orchestrator(vec![
            ProviderSlot::new(
                cfg("a", 1),
                Arc::new(ScriptedProvider::new("a", ScriptedReply::ok(json!("nope")))),
            ),
            ProviderSlot::new(
                cfg("b", 2),
                Arc::new(ScriptedProvider::failing("b", ProviderErrorKind::Auth)),
            ),
        ]);

        let exhausted = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap_err();
        assert_eq!(exhausted.attempts.len(), 2);
        assert!(exhausted.any_malformed());
    }

    #[tokio::test]
    async fn test_no_providers_is_exhausted() {
        let orch = orchestrator(Vec::new());
        let err: TidyError = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap_err()
            .into();
        assert!(err.to_string().contains("no eligible provider"));
    }

    #[tokio::test]
    async fn test_missing_credential_makes_provider_ineligible() {
        let keyed = Arc::new(ScriptedProvider::canned("cloud"));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("cloud", 1).with_requires_key(true), keyed.clone()),
            ProviderSlot::new(cfg("local", 2), Arc::new(ScriptedProvider::canned("local"))),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "local");
        assert_eq!(done.attempts.len(), 1);
        assert_eq!(keyed.calls(), 0);
    }

    #[tokio::test]
    async fn test_credential_feedback_reaches_ledger() {
        let ledger = Arc::new(QuotaLedger::new(
            vec![
                ApiKeyStatus::new("k1", SecretString::from("sk-1"), 100, 10)
                    .with_scope(vec!["cloud".to_string()]),
            ],
            QuotaConfig::default(),
        ));
        let cloud = Arc::new(
            ScriptedProvider::canned("cloud")
                .then(ScriptedReply::fail(ProviderErrorKind::QuotaExceeded)),
        );
        let orch = ProviderOrchestrator::new(
            vec![
                ProviderSlot::new(cfg("cloud", 1).with_requires_key(true), cloud),
                ProviderSlot::new(cfg("local", 2), Arc::new(ScriptedProvider::canned("local"))),
            ],
            ledger.clone(),
            PipelineMetrics::shared(),
        );

        let done = orch
            .analyze("p", b"img", DispatchMode::Sequential)
            .await
            .unwrap();
        assert_eq!(done.provider, "local");
        assert_eq!(done.attempts[0].key_id.as_deref(), Some("k1"));

        let status = ledger.status("k1").unwrap();
        assert_eq!(status.total_requests, 1);
        assert_eq!(status.total_errors, 1);
        assert_eq!(status.minute_remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_enforced() {
        let capped = Arc::new(ScriptedProvider::new(
            "capped",
            ScriptedReply::ok(sample_analysis(70, &[], &[])).with_delay(Duration::from_millis(50)),
        ));
        let orch = Arc::new(orchestrator(vec![ProviderSlot::new(
            cfg("capped", 1).with_max_concurrent(1),
            capped.clone(),
        )]));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.analyze("p", b"img", DispatchMode::Sequential).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(capped.calls(), 3);
        assert_eq!(capped.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_success_wins() {
        let slow = Arc::new(ScriptedProvider::new(
            "slow",
            ScriptedReply::ok(sample_analysis(90, &[], &[])).with_delay(Duration::from_secs(20)),
        ));
        let fast = Arc::new(ScriptedProvider::new(
            "fast",
            ScriptedReply::ok(sample_analysis(40, &[], &[])).with_delay(Duration::from_millis(10)),
        ));
        let orch = orchestrator(vec![
            ProviderSlot::new(cfg("slow", 1), slow),
            ProviderSlot::new(cfg("fast", 2), fast),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Race { top_k: 2 })
            .await
            .unwrap();
        assert_eq!(done.provider, "fast");
        assert_eq!(done.result.cleanliness.score, 40);
        let cancelled: Vec<_> = done
            .attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Cancelled)
            .collect();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].provider, "slow");
    }

    #[tokio::test]
    async fn test_race_failures_continue_sequentially() {
        let third = Arc::new(ScriptedProvider::canned("c"));
        let orch = orchestrator(vec![
            ProviderSlot::new(
                cfg("a", 1),
                Arc::new(ScriptedProvider::failing("a", ProviderErrorKind::Unavailable)),
            ),
            ProviderSlot::new(
                cfg("b", 2),
                Arc::new(ScriptedProvider::failing("b", ProviderErrorKind::Timeout)),
            ),
            ProviderSlot::new(cfg("c", 3), third.clone()),
        ]);

        let done = orch
            .analyze("p", b"img", DispatchMode::Race { top_k: 2 })
            .await
            .unwrap();
        assert_eq!(done.provider, "c");
        assert_eq!(done.attempts.len(), 3);
        assert_eq!(third.calls(), 1);
    }

    #[test]
    fn test_mode_for_priority() {
        let orch = orchestrator(Vec::new()).with_config(OrchestratorConfig {
            racing_enabled: true,
            race_top_k: 2,
        });
        assert_eq!(
            orch.mode_for(Priority::Manual),
            DispatchMode::Race { top_k: 2 }
        );
        assert_eq!(orch.mode_for(Priority::Scheduled), DispatchMode::Sequential);

        let plain = orchestrator(Vec::new());
        assert_eq!(plain.mode_for(Priority::Manual), DispatchMode::Sequential);
    }
}

//! Zone Analyzer
//!
//! Executes one analysis for one zone:
//!
//! 1. capture the camera snapshot
//! 2. read the zone's active tasks
//! 3. look up the cache; on a miss, call the orchestrator through the
//!    in-flight registry so identical inputs share one provider call
//! 4. apply the result to the task list
//!
//! Application is idempotent: completions only touch active items, and new
//! tasks are matched by normalized description against what is already open.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{AnalysisCache, CacheKey};
use super::inflight::InFlightRegistry;
use crate::ai::{
    Exhausted, Orchestrated, ProviderOrchestrator, TimeoutConfig, build_batch_prompt, with_timeout,
};
use crate::config::AnalysisConfig;
use crate::services::{SharedCapture, SharedTaskList};
use crate::types::{
    BatchAnalysisResult, Priority, ProviderAttempt, Result, TaskItem, ZoneConfig,
    normalize_description,
};

type Shared = std::result::Result<Orchestrated, Exhausted>;

/// Changes written to the task list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub completed: Vec<String>,
    pub added: Vec<String>,
    /// Completions below the confidence threshold or for unknown/closed items
    pub skipped_completions: usize,
    /// Proposed tasks already open, repeated, or over the per-run limit
    pub skipped_new: usize,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub result: BatchAnalysisResult,
    pub attempts: Vec<ProviderAttempt>,
    pub applied: AppliedChanges,
    /// Result came from a concurrent identical call
    pub shared: bool,
}

pub struct ZoneAnalyzer {
    capture: SharedCapture,
    tasks: SharedTaskList,
    orchestrator: Arc<ProviderOrchestrator>,
    cache: Arc<AnalysisCache>,
    inflight: InFlightRegistry<Shared>,
    config: AnalysisConfig,
    timeouts: TimeoutConfig,
}

impl ZoneAnalyzer {
    pub fn new(
        capture: SharedCapture,
        tasks: SharedTaskList,
        orchestrator: Arc<ProviderOrchestrator>,
        cache: Arc<AnalysisCache>,
    ) -> Self {
        Self {
            capture,
            tasks,
            orchestrator,
            cache,
            inflight: InFlightRegistry::new(),
            config: AnalysisConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<ProviderOrchestrator> {
        &self.orchestrator
    }

    pub async fn analyze(&self, zone: &ZoneConfig, priority: Priority) -> Result<AnalysisReport> {
        let image = with_timeout(
            self.timeouts.capture,
            self.capture.capture(&zone.camera),
            "capture snapshot",
        )
        .await?;

        let items = self.list_items(zone).await?;
        let active: Vec<TaskItem> = items.into_iter().filter(TaskItem::is_active).collect();
        let key = CacheKey::derive(&image, zone, &active);

        if let Some(cached) = self.cache.get(&key) {
            debug!(zone = %zone.name, key = %key.short(), "Using cached analysis");
            let applied = self.apply(zone, &active, &cached).await?;
            return Ok(AnalysisReport {
                result: cached,
                attempts: Vec::new(),
                applied,
                shared: false,
            });
        }

        let prompt = build_batch_prompt(zone, &active);
        let mode = self.orchestrator.mode_for(priority);
        let (outcome, shared) = self
            .inflight
            .run_or_join(&key, || self.orchestrator.analyze(&prompt, &image, mode))
            .await;

        let (result, attempts) = match outcome {
            Ok(done) => {
                if !shared {
                    self.cache.put(key, done.result.clone(), None);
                }
                (done.result, done.attempts)
            }
            Err(exhausted) if exhausted.any_malformed() => {
                warn!(
                    zone = %zone.name,
                    attempts = exhausted.attempts.len(),
                    "No provider answer could be interpreted, using neutral result"
                );
                (
                    BatchAnalysisResult::fallback("analysis unavailable: unreadable provider response"),
                    exhausted.attempts,
                )
            }
            Err(exhausted) => return Err(exhausted.into()),
        };

        let applied = self.apply(zone, &active, &result).await?;
        info!(
            zone = %zone.name,
            score = result.cleanliness.score,
            completed = applied.completed.len(),
            added = applied.added.len(),
            fallback = result.is_fallback(),
            shared,
            "Zone analyzed"
        );

        Ok(AnalysisReport {
            result,
            attempts,
            applied,
            shared,
        })
    }

    async fn list_items(&self, zone: &ZoneConfig) -> Result<Vec<TaskItem>> {
        with_timeout(
            self.timeouts.task_list,
            self.tasks.list_items(&zone.task_list),
            "list tasks",
        )
        .await
    }

    /// Write completions and new tasks. Safe to repeat with the same result.
    async fn apply(
        &self,
        zone: &ZoneConfig,
        active: &[TaskItem],
        result: &BatchAnalysisResult,
    ) -> Result<AppliedChanges> {
        let mut applied = AppliedChanges::default();
        let active_ids: HashSet<&str> = active.iter().map(|t| t.id.as_str()).collect();
        let mut done: HashSet<String> = HashSet::new();

        for completion in &result.completed_tasks {
            let eligible = completion.confidence >= self.config.completion_confidence_threshold
                && active_ids.contains(completion.task_id.as_str())
                && !done.contains(&completion.task_id);
            if !eligible {
                applied.skipped_completions += 1;
                continue;
            }
            with_timeout(
                self.timeouts.task_list,
                self.tasks.mark_done(&zone.task_list, &completion.task_id),
                "mark task done",
            )
            .await?;
            done.insert(completion.task_id.clone());
            applied.completed.push(completion.task_id.clone());
        }

        let mut open: HashSet<String> = active
            .iter()
            .filter(|t| !done.contains(&t.id))
            .map(TaskItem::match_key)
            .collect();

        for proposed in &result.new_tasks {
            let key = normalize_description(&proposed.description);
            if key.is_empty() || open.contains(&key) || applied.added.len() >= self.config.max_new_tasks
            {
                applied.skipped_new += 1;
                continue;
            }
            let item = with_timeout(
                self.timeouts.task_list,
                self.tasks
                    .add_item(&zone.task_list, &proposed.description, proposed.priority),
                "add task",
            )
            .await?;
            open.insert(key);
            applied.added.push(item.id);
        }

        Ok(applied)
    }
}

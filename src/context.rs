//! Application context
//!
//! Owns every pipeline component. Built once by the entry point (or a test)
//! and passed explicitly; collaborators not supplied to the builder are
//! created from configuration.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::ai::{
    PipelineMetrics, ProviderOrchestrator, ProviderSlot, QuotaLedger, SharedMetrics,
    TimeoutConfig,
};
use crate::config::Config;
use crate::pipeline::{
    AnalysisCache, Scheduler, ShutdownReport, ZoneAnalyzer, ZoneStatusBoard, ZoneTicker,
};
use crate::services::{
    InMemoryTaskList, SharedCapture, SharedTaskList, SharedTelemetry, SqliteTaskList,
    TracingTelemetry, create_capture,
};
use crate::storage::{Database, SharedDatabase};
use crate::types::Result;

pub struct AppContext {
    pub config: Config,
    pub database: Option<SharedDatabase>,
    pub metrics: SharedMetrics,
    pub telemetry: SharedTelemetry,
    pub ledger: Arc<QuotaLedger>,
    pub orchestrator: Arc<ProviderOrchestrator>,
    pub cache: Arc<AnalysisCache>,
    pub analyzer: Arc<ZoneAnalyzer>,
    pub status: Arc<ZoneStatusBoard>,
    pub scheduler: Arc<Scheduler>,
}

impl AppContext {
    /// Production wiring: SQLite storage, configured capture and providers
    pub fn from_config(config: Config) -> Result<Self> {
        if let Some(parent) = config.storage.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.storage.database_path)?;
        db.initialize()?;
        ContextBuilder::new(config).with_database(Arc::new(db)).build()
    }

    pub fn builder(config: Config) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    pub fn ticker(&self) -> ZoneTicker {
        ZoneTicker::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.ledger),
            Arc::clone(&self.cache),
            Duration::from_secs(self.config.scheduler.tick_interval_secs),
        )
    }

    /// Shut the scheduler down with the configured grace period
    pub async fn shutdown(&self) -> ShutdownReport {
        self.scheduler
            .shutdown(self.config.scheduler.shutdown_grace())
            .await
    }
}

pub struct ContextBuilder {
    config: Config,
    database: Option<SharedDatabase>,
    capture: Option<SharedCapture>,
    tasks: Option<SharedTaskList>,
    telemetry: Option<SharedTelemetry>,
    providers: Option<Vec<ProviderSlot>>,
}

impl ContextBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            database: None,
            capture: None,
            tasks: None,
            telemetry: None,
            providers: None,
        }
    }

    pub fn with_database(mut self, database: SharedDatabase) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_capture(mut self, capture: SharedCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_task_list(mut self, tasks: SharedTaskList) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Use these backends instead of the configured providers
    pub fn with_providers(mut self, slots: Vec<ProviderSlot>) -> Self {
        self.providers = Some(slots);
        self
    }

    /// Spawns the scheduler's workers, so it must run inside a tokio runtime
    pub fn build(self) -> Result<AppContext> {
        let config = self.config;
        let database = self.database;
        let metrics = PipelineMetrics::shared();
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetry));

        let ledger = Arc::new(
            QuotaLedger::from_config(&config.api_keys, config.quota.clone())
                .with_telemetry(Arc::clone(&telemetry)),
        );

        let orchestrator = Arc::new(match self.providers {
            Some(slots) => {
                ProviderOrchestrator::new(slots, Arc::clone(&ledger), Arc::clone(&metrics))
                    .with_config(config.orchestrator.clone())
            }
            None => {
                ProviderOrchestrator::from_config(&config, Arc::clone(&ledger), Arc::clone(&metrics))?
            }
        });

        let capture = match self.capture {
            Some(capture) => capture,
            None => create_capture(&config.capture)?,
        };

        let tasks: SharedTaskList = match (self.tasks, &database) {
            (Some(tasks), _) => tasks,
            (None, Some(db)) => Arc::new(SqliteTaskList::new(Arc::clone(db))),
            (None, None) => Arc::new(InMemoryTaskList::new()),
        };

        let cache = Arc::new(AnalysisCache::new(&config.cache));
        let timeouts = TimeoutConfig {
            capture: Duration::from_secs(config.capture.timeout_secs),
            ..TimeoutConfig::default()
        };
        let analyzer = Arc::new(
            ZoneAnalyzer::new(capture, tasks, Arc::clone(&orchestrator), Arc::clone(&cache))
                .with_config(config.analysis.clone())
                .with_timeouts(timeouts),
        );

        let status = Arc::new(ZoneStatusBoard::new(&config.zones, database.clone()));
        let scheduler = Arc::new(Scheduler::start(
            config.scheduler.clone(),
            &config.zones,
            Arc::clone(&analyzer),
            Arc::clone(&status),
            Arc::clone(&telemetry),
            Arc::clone(&metrics),
            database.clone(),
        ));

        info!(
            zones = config.zones.len(),
            providers = orchestrator.slot_statuses().len(),
            keys = ledger.statuses().len(),
            persistent = database.is_some(),
            "Pipeline ready"
        );

        Ok(AppContext {
            config,
            database,
            metrics,
            telemetry,
            ledger,
            orchestrator,
            cache,
            analyzer,
            status,
            scheduler,
        })
    }
}

//! tidyzone - Scheduled vision analysis for household zones
//!
//! Captures a snapshot per zone, asks a vision provider which open tasks are
//! done and what new ones are needed, and applies the answer to the zone's
//! task list.
//!
//! ## Core Features
//!
//! - **Priority Scheduling**: manual > triggered > scheduled, FIFO within a
//!   level, one analysis per zone at a time, bounded worker pool
//! - **Provider Orchestration**: priority order, per-provider concurrency
//!   caps, fallback on transient errors, optional racing for manual requests
//! - **Quota Ledger**: per-key daily and per-minute budgets with back-off
//! - **Analysis Cache**: SHA-256 keyed results with TTL and capacity eviction
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidyzone::{AppContext, ConfigLoader, Priority};
//!
//! let ctx = AppContext::from_config(ConfigLoader::load()?)?;
//! let id = ctx.scheduler.enqueue("kitchen", Priority::Manual)?;
//! let outcome = ctx.scheduler.wait(&id, Duration::from_secs(120)).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: vision providers, orchestrator, quota ledger, prompt and response
//! - [`pipeline`]: scheduler, analyzer, cache, status board, ticker
//! - [`services`]: capture, task list and telemetry adapters
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod types;

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{Result, ResultExt, TidyError};

// Context
pub use context::{AppContext, ContextBuilder};

// Storage
pub use storage::{Database, PoolConfig, SharedDatabase};

// Pipeline
pub use pipeline::{AnalysisCache, Scheduler, ShutdownReport, ZoneAnalyzer, ZoneStatusBoard, ZoneTicker};

// AI
pub use ai::{PipelineMetrics, ProviderOrchestrator, QuotaLedger, SharedMetrics, VisionProvider};

// Domain
pub use types::{AnalysisRequest, BatchAnalysisResult, Priority, RequestId, RequestOutcome, ZoneConfig};

//! Zone analysis pipeline: cache, in-flight registry, analyzer, scheduler,
//! status board and ticker.

pub mod analyzer;
pub mod cache;
pub mod inflight;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod ticker;

pub use analyzer::{AnalysisReport, AppliedChanges, ZoneAnalyzer};
pub use cache::{AnalysisCache, CacheKey, CacheStats};
pub use inflight::InFlightRegistry;
pub use queue::RequestQueue;
pub use scheduler::{Scheduler, SchedulerStats, ShutdownReport};
pub use status::ZoneStatusBoard;
pub use ticker::{TickReport, ZoneTicker};

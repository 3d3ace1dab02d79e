//! External collaborators consumed by the pipeline: image capture, task
//! lists and telemetry. Each sits behind a trait with a production adapter
//! and an in-memory adapter chosen at construction.

pub mod capture;
pub mod tasks;
pub mod telemetry;

pub use capture::{
    FileCapture, HttpCapture, ImageCapture, SharedCapture, StaticCapture, create_capture,
};
pub use tasks::{InMemoryTaskList, SharedTaskList, SqliteTaskList, TaskList};
pub use telemetry::{
    MemoryTelemetry, SharedTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry,
};

pub mod analysis;
pub mod error;
pub mod request;
pub mod zone;

pub use analysis::{
    BatchAnalysisResult, CleanlinessAssessment, CleanlinessState, CompletedTask, ProposedTask,
    ResultMetadata,
};
pub use error::{ErrorClassifier, ProviderError, ProviderErrorKind, Result, ResultExt, TidyError};
pub use request::{
    AnalysisRequest, AttemptOutcome, FailureRecord, Priority, ProviderAttempt, RequestId,
    RequestOutcome, RequestState,
};
pub use zone::{
    TaskItem, TaskPriority, TaskStatus, ZoneConfig, ZoneRunStatus, ZoneStatus,
    normalize_description,
};

//! AI Integration Layer
//!
//! Vision providers, the orchestrator that picks between them, the credential
//! quota ledger and the prompt/response handling around a provider call.

pub mod metrics;
pub mod prompt;
pub mod provider;
pub mod quota;
pub mod response;
pub mod timeout;

pub use metrics::{MetricsSummary, PipelineMetrics, ProviderMetrics, SharedMetrics};
pub use prompt::{PromptBuilder, SYSTEM_PROMPT, build_batch_prompt};
pub use provider::{
    DispatchMode, Exhausted, Orchestrated, ProviderOrchestrator, ProviderReply, ProviderSlot,
    ScriptedProvider, ScriptedReply, SharedProvider, SlotStatus, TokenUsage, VisionProvider,
    VisionRequest, create_provider, sample_analysis,
};
pub use quota::{ApiKeyStatus, BatchPlan, KeyLease, KeyStatusSnapshot, QuotaLedger};
pub use response::{extract_json, parse_batch_result};
pub use timeout::{TimeoutConfig, with_provider_timeout, with_timeout};

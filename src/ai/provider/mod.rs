//! Vision Provider Abstraction
//!
//! Defines the `VisionProvider` trait: "analyze image I with prompt P" as an
//! opaque capability. Providers return raw JSON content; parsing into a
//! `BatchAnalysisResult` happens in the orchestrator so that every backend is
//! validated the same way.
//!
//! ## Modules
//!
//! - `orchestrator`: Priority ranking, concurrency caps, fallback and racing
//! - `scripted`: In-memory backend for tests and offline runs

mod ollama;
mod openai;
mod orchestrator;
mod scripted;

pub use ollama::OllamaVisionProvider;
pub use openai::OpenAiVisionProvider;
pub use orchestrator::{
    DispatchMode, Exhausted, Orchestrated, ProviderOrchestrator, ProviderSlot, SlotStatus,
};
pub use scripted::{ScriptedProvider, ScriptedReply, sample_analysis};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderConfig, ProviderKind};
use crate::types::{ProviderError, Result};

/// One analysis call as seen by a backend
#[derive(Debug, Clone, Copy)]
pub struct VisionRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a [u8],
    pub credential: Option<&'a SecretString>,
    pub timeout: Duration,
}

/// Raw backend answer
#[derive(Debug, Clone)]
pub struct ProviderReply {
    /// Extracted JSON content
    pub content: Value,
    pub usage: TokenUsage,
    pub model: String,
}

impl ProviderReply {
    pub fn content_only(content: Value) -> Self {
        Self {
            content,
            usage: TokenUsage::default(),
            model: String::new(),
        }
    }
}

/// Token usage metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Vision-capable backend
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn submit(
        &self,
        request: VisionRequest<'_>,
    ) -> std::result::Result<ProviderReply, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

pub type SharedProvider = Arc<dyn VisionProvider>;

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiVisionProvider::new(config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaVisionProvider::new(config)?)),
        ProviderKind::Mock => Ok(Arc::new(ScriptedProvider::canned(&config.name))),
    }
}

/// MIME type guessed from magic bytes, for data URLs
pub(crate) fn sniff_image_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0d]), "image/png");
        assert_eq!(sniff_image_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8"), "image/webp");
        assert_eq!(sniff_image_mime(&[0xff, 0xd8, 0xff]), "image/jpeg");
    }

    #[test]
    fn test_create_mock_provider() {
        let config = ProviderConfig::new("offline", ProviderKind::Mock);
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "offline");
    }
}

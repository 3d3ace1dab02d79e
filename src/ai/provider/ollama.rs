//! Ollama Local Vision Provider
//!
//! Uses `/api/generate` with the `images` field of a multimodal model
//! (llava, llama3.2-vision, ...). No credential is needed.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProviderReply, TokenUsage, VisionProvider, VisionRequest};
use crate::ai::prompt::SYSTEM_PROMPT;
use crate::ai::response::extract_json;
use crate::config::ProviderConfig;
use crate::constants::network::DEFAULT_OLLAMA_BASE;
use crate::types::{ErrorClassifier, ProviderError, Result, TidyError};

pub struct OllamaVisionProvider {
    name: String,
    api_base: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaVisionProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE.to_string());
        let api_base = Self::validate_endpoint(&api_base)?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TidyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            api_base,
            model: config.model.clone(),
            temperature: config.temperature,
            client,
        })
    }

    /// Only http/https; non-local hosts are allowed but logged
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            TidyError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TidyError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Snapshots will leave this machine.",
                host
            );
        }

        Ok(url.to_string().trim_end_matches('/').to_string())
    }

    fn build_request(&self, prompt: &str, image: &[u8]) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            images: vec![BASE64.encode(image)],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl VisionProvider for OllamaVisionProvider {
    async fn submit(
        &self,
        request: VisionRequest<'_>,
    ) -> std::result::Result<ProviderReply, ProviderError> {
        let body = self.build_request(request.prompt, request.image);
        let url = format!("{}/api/generate", self.api_base);

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, &self.name))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("HTTP {}: {}", status, text.chars().take(300).collect::<String>()),
                &self.name,
            ));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(&self.name, format!("invalid body: {}", e)))?;

        let content =
            extract_json(&parsed.response).map_err(|e| ProviderError::malformed(&self.name, e))?;
        let usage = TokenUsage {
            input_tokens: parsed.prompt_eval_count.unwrap_or(0),
            output_tokens: parsed.eval_count.unwrap_or(0),
        };

        debug!(
            provider = %self.name,
            model = %self.model,
            tokens = usage.total(),
            "Vision response received"
        );

        Ok(ProviderReply {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

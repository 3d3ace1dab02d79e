//! OpenAI-compatible Vision Provider
//!
//! Chat Completions with an inline base64 image. Works with any endpoint that
//! speaks the OpenAI wire format (`api_base`).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{ProviderReply, TokenUsage, VisionProvider, VisionRequest, sniff_image_mime};
use crate::ai::prompt::SYSTEM_PROMPT;
use crate::ai::response::extract_json;
use crate::config::ProviderConfig;
use crate::constants::network::DEFAULT_OPENAI_BASE;
use crate::types::{ErrorClassifier, ProviderError, ProviderErrorKind, Result, TidyError};

const MAX_TOKENS: u32 = 1_500;

pub struct OpenAiVisionProvider {
    name: String,
    api_base: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiVisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiVisionProvider")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiVisionProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE.to_string());
        url::Url::parse(&api_base)
            .map_err(|e| TidyError::Config(format!("Invalid api_base '{}': {}", api_base, e)))?;

        // The orchestrator enforces the per-call timeout
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TidyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
        })
    }

    fn build_request(&self, prompt: &str, image: &[u8]) -> ChatCompletionRequest {
        let data_url = format!(
            "data:{};base64,{}",
            sniff_image_mime(image),
            BASE64.encode(image)
        );

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: vec![ContentPart::Text {
                        text: SYSTEM_PROMPT.to_string(),
                    }],
                },
                ChatMessage {
                    role: "user",
                    content: vec![
                        ContentPart::Text {
                            text: prompt.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        },
                    ],
                },
            ],
            temperature: self.temperature,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    async fn submit(
        &self,
        request: VisionRequest<'_>,
    ) -> std::result::Result<ProviderReply, ProviderError> {
        let credential = request.credential.ok_or_else(|| {
            ProviderError::with_provider(
                ProviderErrorKind::Auth,
                "no API key reserved for request",
                &self.name,
            )
        })?;

        let start = Instant::now();
        let body = self.build_request(request.prompt, request.image);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose_secret())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, &self.name))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = ErrorClassifier::parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let text = response.text().await.unwrap_or_default();
            let mut err = ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("HTTP {}: {}", status, text.chars().take(300).collect::<String>()),
                &self.name,
            );
            if let Some(delay) = retry_after {
                err = err.retry_after(delay);
            }
            return Err(err);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(&self.name, format!("invalid body: {}", e)))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ProviderError::malformed(&self.name, "no content in response"))?;
        let content =
            extract_json(text).map_err(|e| ProviderError::malformed(&self.name, e))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            provider = %self.name,
            model = %self.model,
            tokens = usage.total(),
            elapsed_ms = start.elapsed().as_millis() as u64,
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

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_request_carries_image_data_url() {
        let provider =
            OpenAiVisionProvider::new(&ProviderConfig::new("openai", ProviderKind::OpenAi))
                .unwrap();
        let request = provider.build_request("analyze", &[0x89, b'P', b'N', b'G']);
        let json = serde_json::to_value(&request).unwrap();

        let parts = &json["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_invalid_api_base_rejected() {
        let mut config = ProviderConfig::new("openai", ProviderKind::OpenAi);
        config.api_base = Some("not a url".to_string());
        assert!(OpenAiVisionProvider::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_missing_credential_is_auth_error() {
        let provider =
            OpenAiVisionProvider::new(&ProviderConfig::new("openai", ProviderKind::OpenAi))
                .unwrap();
        let err = provider
            .submit(VisionRequest {
                prompt: "p",
                image: b"img",
                credential: None,
                timeout: std::time::Duration::from_secs(1),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
    }
}

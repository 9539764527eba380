//! OpenAI chat-completions adapter.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

use super::error::{classify_http_status, parse_retry_after, AiError, AiErrorKind};
use super::{ChatMessage, ChatOptions, ChatProvider, ProviderChatResponse, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat provider backed by the OpenAI chat-completions endpoint.
pub struct OpenAiChat {
    http: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiChat {
    /// Build from provider config. The chat provider is required, so a
    /// missing key is a configuration error at startup rather than a
    /// disabled feature.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AiError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| AiError::configuration("OPENAI_API_KEY is not configured"))?;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .build()
            .map_err(|e| AiError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a custom endpoint (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiChat {
    fn service(&self) -> &'static str {
        "openai"
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ProviderChatResponse, AiError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                AiError::new(AiErrorKind::ServerError, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            let text = response.text().await.unwrap_or_default();
            let kind = classify_http_status(status.as_u16(), &text);
            warn!(status = %status, kind = kind.as_str(), "OpenAI API error");
            return Err(AiError::new(kind, text).with_retry_after(retry_after));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            AiError::new(AiErrorKind::Unknown, format!("malformed response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::new(AiErrorKind::Unknown, "empty completion"))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        debug!(
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "OpenAI chat completion"
        );

        Ok(ProviderChatResponse {
            content,
            usage,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
        })
    }
}

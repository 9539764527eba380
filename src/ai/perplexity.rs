//! Perplexity search adapter.
//!
//! Optional feature like the image provider: no key, no search.

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::config::ProviderConfig;

use super::error::{classify_http_status, parse_retry_after, AiError, AiErrorKind};
use super::{ProviderSearchResponse, SearchProvider, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const MODEL: &str = "sonar";

pub struct PerplexitySearch {
    http: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    citations: Vec<String>,
    usage: Option<ApiUsage>,
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

impl PerplexitySearch {
    /// Returns `None` when no key is configured (feature disabled).
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let api_key = config.perplexity_api_key.clone()?;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .build()
            .ok()?;
        Some(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl SearchProvider for PerplexitySearch {
    fn service(&self) -> &'static str {
        "perplexity"
    }

    async fn search(&self, query: &str) -> Result<ProviderSearchResponse, AiError> {
        let body = serde_json::json!({
            "model": MODEL,
            "messages": [
                {"role": "system", "content": "Answer concisely with citations."},
                {"role": "user", "content": query},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Perplexity request failed");
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
            warn!(status = %status, kind = kind.as_str(), "Perplexity API error");
            return Err(AiError::new(kind, text).with_retry_after(retry_after));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            AiError::new(AiErrorKind::Unknown, format!("malformed response: {e}"))
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::new(AiErrorKind::Unknown, "empty search answer"))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(ProviderSearchResponse {
            answer,
            citations: parsed.citations,
            usage,
        })
    }
}

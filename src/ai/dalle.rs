//! DALL-E image-generation adapter.
//!
//! Image generation is an optional feature: without an API key the
//! provider is simply absent and callers receive a configuration error.

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::budget::{ImageQuality, ImageSize};
use crate::config::ProviderConfig;

use super::error::{classify_http_status, parse_retry_after, AiError, AiErrorKind};
use super::{ImageProvider, ProviderImageResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MODEL: &str = "dall-e-3";

pub struct DalleProvider {
    http: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<ApiImage>,
}

#[derive(Deserialize)]
struct ApiImage {
    url: String,
}

impl DalleProvider {
    /// Returns `None` when no key is configured (feature disabled).
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let api_key = config.dalle_api_key.clone()?;
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
impl ImageProvider for DalleProvider {
    fn service(&self) -> &'static str {
        "dalle"
    }

    async fn generate(
        &self,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<ProviderImageResponse, AiError> {
        let body = serde_json::json!({
            "model": MODEL,
            "prompt": prompt,
            "n": 1,
            "size": size.as_str(),
            "quality": match quality {
                ImageQuality::Standard => "standard",
                ImageQuality::Hd => "hd",
            },
        });

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "DALL-E request failed");
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
            warn!(status = %status, kind = kind.as_str(), "DALL-E API error");
            return Err(AiError::new(kind, text).with_retry_after(retry_after));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            AiError::new(AiErrorKind::Unknown, format!("malformed response: {e}"))
        })?;
        let url = parsed
            .data
            .into_iter()
            .next()
            .map(|i| i.url)
            .ok_or_else(|| AiError::new(AiErrorKind::Unknown, "no image in response"))?;

        Ok(ProviderImageResponse {
            url,
            model: MODEL.to_string(),
        })
    }
}

//! AI provider layer.
//!
//! This module provides trait-based abstractions over the three outbound
//! AI services (chat completion, image generation, search) and the
//! [`AiGateway`] façade that wires budget gating, idempotent caching and
//! cost recording around them.

mod dalle;
mod error;
mod gateway;
mod openai;
mod perplexity;

pub use dalle::DalleProvider;
pub use error::{classify_http_status, AiError, AiErrorKind};
pub use gateway::{AiGateway, ChatOutcome, ChatRequest, ImageOutcome, SearchOutcome};
pub use openai::OpenAiChat;
pub use perplexity::PerplexitySearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::{ImageQuality, ImageSize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Optional parameters for chat completions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
}

/// Raw response from a chat provider, before cost attribution.
#[derive(Debug, Clone)]
pub struct ProviderChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Raw response from an image provider.
#[derive(Debug, Clone)]
pub struct ProviderImageResponse {
    pub url: String,
    pub model: String,
}

/// Raw response from a search provider.
#[derive(Debug, Clone)]
pub struct ProviderSearchResponse {
    pub answer: String,
    pub citations: Vec<String>,
    pub usage: TokenUsage,
}

/// Chat-completion provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Service name used for cost attribution ("openai").
    fn service(&self) -> &'static str;

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ProviderChatResponse, AiError>;
}

/// Image-generation provider.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn service(&self) -> &'static str;

    async fn generate(
        &self,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<ProviderImageResponse, AiError>;
}

/// Search provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn service(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<ProviderSearchResponse, AiError>;
}

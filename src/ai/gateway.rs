//! AI gateway - the single entry point for outbound AI calls.
//!
//! Wraps every provider call with the same sequence: pick a model, gate the
//! estimated spend through the budget governor, probe the idempotent cache
//! for deterministic calls, execute, then record the actual cost from the
//! provider's usage counts. Exactly one cost event per non-cached success;
//! none on failure or cache hit.
//!
//! The gateway never retries. Classified errors surface to the job layer,
//! which owns backoff policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::budget::{
    estimate_cost, image_price, search_cost, select_model, BudgetGovernor, CostLedger,
    CostMetadata, ImageQuality, ImageSize, TaskType,
};
use crate::config::CacheConfig;

use super::error::AiError;
use super::{
    ChatMessage, ChatOptions, ChatProvider, ImageProvider, SearchProvider, TokenUsage,
};

/// Rough ~4-chars-per-token estimate, good enough for pre-call budgeting.
fn approx_tokens(text: &str) -> u64 {
    ((text.chars().count() + 3) / 4) as u64
}

const DEFAULT_OUTPUT_ESTIMATE: u64 = 1024;

/// A chat call through the gateway.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub task: TaskType,
    pub messages: Vec<ChatMessage>,
    pub options: ChatOptions,
    pub word_count_hint: Option<u32>,
}

impl ChatRequest {
    pub fn new(task: TaskType, messages: Vec<ChatMessage>) -> Self {
        Self {
            task,
            messages,
            options: ChatOptions::default(),
            word_count_hint: None,
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_word_count_hint(mut self, words: u32) -> Self {
        self.word_count_hint = Some(words);
        self
    }
}

/// Normalized result of a chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub cost: f64,
    /// True when served from the idempotent cache; cost is zero and no
    /// cost event was recorded, so callers must not count spend again.
    pub cached: bool,
}

/// Normalized result of an image call.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub url: String,
    pub model: String,
    pub cost: f64,
}

/// Normalized result of a search call.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub answer: String,
    pub citations: Vec<String>,
    pub usage: TokenUsage,
    pub cost: f64,
}

#[derive(Clone)]
struct CachedCompletion {
    content: String,
    usage: TokenUsage,
    model: String,
}

/// The gateway façade over all providers.
pub struct AiGateway {
    chat_provider: Arc<dyn ChatProvider>,
    image_provider: Option<Arc<dyn ImageProvider>>,
    search_provider: Option<Arc<dyn SearchProvider>>,
    governor: Arc<BudgetGovernor>,
    ledger: Arc<CostLedger>,
    cache_config: CacheConfig,
    completion_cache: Mutex<HashMap<String, CachedCompletion>>,
}

impl AiGateway {
    pub fn new(
        chat_provider: Arc<dyn ChatProvider>,
        image_provider: Option<Arc<dyn ImageProvider>>,
        search_provider: Option<Arc<dyn SearchProvider>>,
        governor: Arc<BudgetGovernor>,
        ledger: Arc<CostLedger>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            chat_provider,
            image_provider,
            search_provider,
            governor,
            ledger,
            cache_config,
            completion_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether image generation is available.
    pub fn has_image_provider(&self) -> bool {
        self.image_provider.is_some()
    }

    /// Whether search is available.
    pub fn has_search_provider(&self) -> bool {
        self.search_provider.is_some()
    }

    fn record_cost(&self, service: &str, operation: &str, amount: f64, metadata: CostMetadata) {
        // A ledger hiccup must never fail a successful generation; the
        // lost event is logged loudly instead.
        if let Err(err) = self.ledger.record(service, operation, amount, metadata) {
            error!(service, operation, amount, error = %err, "failed to record cost event");
        }
    }

    fn cache_key(&self, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> String {
        let payload = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let mut hasher = Sha256::new();
        hasher.update(payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn cacheable(&self, options: &ChatOptions) -> bool {
        self.cache_config.idempotent_llm_cache
            && options.temperature.unwrap_or(1.0)
                <= self.cache_config.idempotent_temperature_ceiling
    }

    /// Execute a chat completion with budget gating and cost recording.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, AiError> {
        let choice = select_model(request.task, request.word_count_hint);

        let input_estimate: u64 = request
            .messages
            .iter()
            .map(|m| approx_tokens(&m.content))
            .sum();
        let output_estimate = request.options.max_tokens.unwrap_or(DEFAULT_OUTPUT_ESTIMATE);
        let estimated = estimate_cost(&choice, input_estimate, output_estimate);

        self.governor
            .can_proceed(estimated, self.chat_provider.service())
            .map_err(|e| AiError::budget_exceeded(e.to_string()))?;

        let cacheable = self.cacheable(&request.options);
        let key = if cacheable {
            let key = self.cache_key(choice.model, &request.messages, &request.options);
            let cache = self.completion_cache.lock().expect("completion cache lock");
            if let Some(hit) = cache.get(&key) {
                debug!(model = choice.model, task = request.task.as_str(), "completion cache hit");
                return Ok(ChatOutcome {
                    content: hit.content.clone(),
                    usage: hit.usage,
                    model: hit.model.clone(),
                    cost: 0.0,
                    cached: true,
                });
            }
            Some(key)
        } else {
            None
        };

        let response = self
            .chat_provider
            .chat(choice.model, &request.messages, &request.options)
            .await?;

        // Actual cost comes from the provider's usage counts, not the
        // pre-call estimate.
        let cost = estimate_cost(
            &choice,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );
        self.record_cost(
            self.chat_provider.service(),
            request.task.as_str(),
            cost,
            CostMetadata {
                model: Some(response.model.clone()),
                input_tokens: Some(response.usage.prompt_tokens),
                output_tokens: Some(response.usage.completion_tokens),
            },
        );

        if let Some(key) = key {
            let mut cache = self.completion_cache.lock().expect("completion cache lock");
            cache.insert(
                key,
                CachedCompletion {
                    content: response.content.clone(),
                    usage: response.usage,
                    model: response.model.clone(),
                },
            );
        }

        info!(
            model = %response.model,
            task = request.task.as_str(),
            cost,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "chat completion finished"
        );

        Ok(ChatOutcome {
            content: response.content,
            usage: response.usage,
            model: response.model,
            cost,
            cached: false,
        })
    }

    /// Execute an image generation.
    pub async fn generate_image(
        &self,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<ImageOutcome, AiError> {
        let provider = self
            .image_provider
            .as_ref()
            .ok_or_else(|| AiError::configuration("image generation is not configured"))?;

        let cost = image_price(size, quality);
        self.governor
            .can_proceed(cost, provider.service())
            .map_err(|e| AiError::budget_exceeded(e.to_string()))?;

        let response = provider.generate(prompt, size, quality).await?;
        self.record_cost(
            provider.service(),
            "image",
            cost,
            CostMetadata {
                model: Some(response.model.clone()),
                ..CostMetadata::default()
            },
        );
        info!(model = %response.model, cost, "image generation finished");

        Ok(ImageOutcome {
            url: response.url,
            model: response.model,
            cost,
        })
    }

    /// Execute a search query.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome, AiError> {
        let provider = self
            .search_provider
            .as_ref()
            .ok_or_else(|| AiError::configuration("search is not configured"))?;

        // Flat worst-case estimate; actual cost uses returned usage.
        let estimated = search_cost(approx_tokens(query), DEFAULT_OUTPUT_ESTIMATE);
        self.governor
            .can_proceed(estimated, provider.service())
            .map_err(|e| AiError::budget_exceeded(e.to_string()))?;

        let response = provider.search(query).await?;
        let cost = search_cost(
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );
        self.record_cost(
            provider.service(),
            "search",
            cost,
            CostMetadata {
                input_tokens: Some(response.usage.prompt_tokens),
                output_tokens: Some(response.usage.completion_tokens),
                ..CostMetadata::default()
            },
        );

        Ok(SearchOutcome {
            answer: response.answer,
            citations: response.citations,
            usage: response.usage,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ai::ProviderChatResponse;
    use crate::budget::LogAlertSink;
    use crate::config::BudgetConfig;

    struct ScriptedChat {
        calls: AtomicUsize,
        fail_with: Option<AiError>,
    }

    impl ScriptedChat {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatProvider for ScriptedChat {
        fn service(&self) -> &'static str {
            "openai"
        }

        async fn chat(
            &self,
            model: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ProviderChatResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(ProviderChatResponse {
                content: "generated text".into(),
                usage: TokenUsage::new(1000, 500),
                model: model.to_string(),
            })
        }
    }

    fn gateway_with(
        provider: Arc<ScriptedChat>,
        budget: BudgetConfig,
        cache: CacheConfig,
    ) -> (AiGateway, Arc<CostLedger>) {
        let ledger = Arc::new(CostLedger::open(":memory:", 0).unwrap());
        let governor = Arc::new(BudgetGovernor::new(
            budget,
            ledger.clone(),
            Arc::new(LogAlertSink),
            0,
        ));
        let gateway = AiGateway::new(provider, None, None, governor, ledger.clone(), cache);
        (gateway, ledger)
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            TaskType::Article,
            vec![ChatMessage::user("write about solar panels")],
        )
        .with_options(ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(500),
        })
    }

    #[tokio::test]
    async fn successful_call_records_exactly_one_cost_event() {
        let provider = Arc::new(ScriptedChat::ok());
        let (gateway, ledger) =
            gateway_with(provider.clone(), BudgetConfig::default(), CacheConfig::default());

        let outcome = gateway.chat(request()).await.unwrap();
        assert!(!outcome.cached);
        assert!(outcome.cost > 0.0);
        assert_eq!(ledger.daily_cost(Some("openai")).unwrap(), outcome.cost);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deterministic_repeat_hits_cache_with_zero_cost() {
        let provider = Arc::new(ScriptedChat::ok());
        let (gateway, ledger) =
            gateway_with(provider.clone(), BudgetConfig::default(), CacheConfig::default());

        let first = gateway.chat(request()).await.unwrap();
        let second = gateway.chat(request()).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.cost, 0.0);
        assert_eq!(second.content, first.content);
        // Only the first call reached the provider or the ledger.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.daily_cost(None).unwrap(), first.cost);
    }

    #[tokio::test]
    async fn high_temperature_calls_bypass_cache() {
        let provider = Arc::new(ScriptedChat::ok());
        let (gateway, _) =
            gateway_with(provider.clone(), BudgetConfig::default(), CacheConfig::default());

        let mut req = request();
        req.options.temperature = Some(0.9);
        gateway.chat(req.clone()).await.unwrap();
        gateway.chat(req).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn budget_denial_prevents_provider_call() {
        let provider = Arc::new(ScriptedChat::ok());
        let budget = BudgetConfig {
            daily_budget: 0.000001,
            block_on_exceeded: true,
            ..BudgetConfig::default()
        };
        let (gateway, ledger) = gateway_with(provider.clone(), budget, CacheConfig::default());

        let err = gateway.chat(request()).await.unwrap_err();
        assert_eq!(err.kind, crate::ai::AiErrorKind::BudgetExceeded);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.daily_cost(None).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn failed_call_records_no_cost() {
        let provider = Arc::new(ScriptedChat {
            calls: AtomicUsize::new(0),
            fail_with: Some(AiError::new(
                crate::ai::AiErrorKind::ServerError,
                "upstream 503",
            )),
        });
        let (gateway, ledger) =
            gateway_with(provider, BudgetConfig::default(), CacheConfig::default());

        let err = gateway.chat(request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.daily_cost(None).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn image_without_provider_is_configuration_error() {
        let provider = Arc::new(ScriptedChat::ok());
        let (gateway, _) =
            gateway_with(provider, BudgetConfig::default(), CacheConfig::default());
        let err = gateway
            .generate_image("a lighthouse", ImageSize::Square, ImageQuality::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ai::AiErrorKind::Configuration);
    }
}

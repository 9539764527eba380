//! End-to-end pipeline tests: scheduler, fan-out graph, retry policy and
//! terminal failure hooks, driven with paused time and scripted providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use contentpipe::ai::{
    AiError, AiErrorKind, AiGateway, ChatMessage, ChatOptions, ChatProvider, ImageProvider,
    ProviderChatResponse, ProviderImageResponse, ProviderSearchResponse, SearchProvider,
    TokenUsage,
};
use contentpipe::budget::{BudgetGovernor, CostLedger, ImageQuality, ImageSize, LogAlertSink};
use contentpipe::cache::ContentCache;
use contentpipe::config::Config;
use contentpipe::domain::{
    BatchSpec, ContentEntity, ContentKind, ContentRepository, ContentStatus, DomainError,
    InMemoryRepository, InMemorySitemap, LinkChecker, LogIndexingClient, LogPublisher,
    ManualTitle, PlannedItem, ProgramSpec,
};
use contentpipe::jobs::{JobPayload, PipelineContext, Scheduler, SubmitOutcome};

/// Chat provider with a scripted failure sequence; once the script is
/// drained every call succeeds.
struct ScriptedChat {
    calls: Mutex<Vec<tokio::time::Instant>>,
    script: Mutex<VecDeque<AiError>>,
}

impl ScriptedChat {
    fn always_ok() -> Self {
        Self::failing_with(Vec::new())
    }

    fn failing_with(errors: Vec<AiError>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(errors.into()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
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
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ProviderChatResponse {
            content: "generated body".into(),
            usage: TokenUsage::new(800, 400),
            model: model.to_string(),
        })
    }
}

struct StubImage;

#[async_trait]
impl ImageProvider for StubImage {
    fn service(&self) -> &'static str {
        "dalle"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _size: ImageSize,
        _quality: ImageQuality,
    ) -> Result<ProviderImageResponse, AiError> {
        Ok(ProviderImageResponse {
            url: "https://images.example.com/header.png".into(),
            model: "dall-e-3".into(),
        })
    }
}

struct StubSearch;

#[async_trait]
impl SearchProvider for StubSearch {
    fn service(&self) -> &'static str {
        "perplexity"
    }

    async fn search(&self, _query: &str) -> Result<ProviderSearchResponse, AiError> {
        Ok(ProviderSearchResponse {
            answer: "sources found".into(),
            citations: vec![
                "https://stats.example.org/report".into(),
                "https://gov.example.org/data".into(),
            ],
            usage: TokenUsage::new(120, 80),
        })
    }
}

struct AllAliveChecker(AtomicUsize);

#[async_trait]
impl LinkChecker for AllAliveChecker {
    async fn is_alive(&self, _url: &str) -> Result<bool, DomainError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

struct Fixture {
    ctx: Arc<PipelineContext>,
    scheduler: Scheduler,
    repo: Arc<InMemoryRepository>,
    sitemap: Arc<InMemorySitemap>,
    chat: Arc<ScriptedChat>,
}

fn fixture(chat: ScriptedChat) -> Fixture {
    let config = Arc::new(Config::default());
    let chat = Arc::new(chat);
    let ledger = Arc::new(CostLedger::open(":memory:", 0).unwrap());
    let governor = Arc::new(BudgetGovernor::new(
        config.budget.clone(),
        Arc::clone(&ledger),
        Arc::new(LogAlertSink),
        0,
    ));
    let gateway = Arc::new(AiGateway::new(
        chat.clone(),
        Some(Arc::new(StubImage)),
        Some(Arc::new(StubSearch)),
        Arc::clone(&governor),
        Arc::clone(&ledger),
        config.cache.clone(),
    ));
    let repo = Arc::new(InMemoryRepository::new());
    let sitemap = Arc::new(InMemorySitemap::new());
    let ctx = Arc::new(PipelineContext {
        config,
        gateway,
        cache: Arc::new(ContentCache::new(Default::default(), 0)),
        ledger,
        governor,
        repo: repo.clone(),
        publisher: Arc::new(LogPublisher),
        indexer: Arc::new(LogIndexingClient),
        sitemap: sitemap.clone(),
        link_checker: Arc::new(AllAliveChecker(AtomicUsize::new(0))),
    });
    let scheduler = Scheduler::start(Arc::clone(&ctx));
    Fixture {
        ctx,
        scheduler,
        repo,
        sitemap,
        chat,
    }
}

async fn seed_article(repo: &InMemoryRepository, body: Option<&str>) -> Uuid {
    let mut entity = ContentEntity::new(ContentKind::Article, "placas solares", "es", "ES", 1200);
    if let Some(body) = body {
        entity.body = Some(body.to_string());
        entity.status = ContentStatus::Generated;
    }
    let id = entity.id;
    repo.insert_content(entity).await.unwrap();
    id
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn generation_fans_out_translations_and_image() {
    let f = fixture(ScriptedChat::always_ok());
    let entity_id = seed_article(&f.repo, None).await;

    let outcome = f
        .scheduler
        .submit(JobPayload::GenerateArticle {
            entity_id,
            force: false,
        });
    assert!(matches!(outcome, SubmitOutcome::Enqueued(_)));
    f.scheduler.wait_idle().await;

    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.status, ContentStatus::Generated);
    assert_eq!(entity.body.as_deref(), Some("generated body"));
    // Source language (es) skipped; en and fr translated.
    assert_eq!(entity.translations.len(), 2);
    assert!(entity.translations.contains_key("en"));
    assert!(entity.translations.contains_key("fr"));
    assert!(entity.image_url.is_some());
    assert!(entity.image_optimized);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn translation_fan_out_is_staggered() {
    let f = fixture(ScriptedChat::always_ok());
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    let start = tokio::time::Instant::now();
    f.scheduler
        .submit(JobPayload::TranslateAllLanguages { entity_id });
    f.scheduler.wait_idle().await;

    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.translations.len(), 2);

    let stagger = f.ctx.config.pipeline.translation_stagger_secs;
    let times = f.chat.call_times();
    assert_eq!(times.len(), 2);
    // First dispatch is immediate, the second waits one stagger interval.
    assert!(times[0] - start < Duration::from_secs(stagger));
    assert!(times[1] - start >= Duration::from_secs(stagger));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rate_limited_job_retries_after_hint() {
    let rate_limited = AiError::new(AiErrorKind::RateLimit, "429")
        .with_retry_after(Some(Duration::from_secs(30)));
    let f = fixture(ScriptedChat::failing_with(vec![rate_limited]));
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    let start = tokio::time::Instant::now();
    f.scheduler.submit(JobPayload::TranslateArticle {
        entity_id,
        language: "en".into(),
        force: false,
    });
    f.scheduler.wait_idle().await;

    let times = f.chat.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - start >= Duration::from_secs(30));

    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert!(entity.translations.contains_key("en"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn exhausted_attempts_run_terminal_hook_once() {
    let server_error = || AiError::new(AiErrorKind::ServerError, "503");
    let f = fixture(ScriptedChat::failing_with(vec![
        server_error(),
        server_error(),
        server_error(),
    ]));
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    f.scheduler.submit(JobPayload::TranslateArticle {
        entity_id,
        language: "en".into(),
        force: false,
    });
    f.scheduler.wait_idle().await;

    // Three attempts, then the terminal hook marks the entity failed.
    assert_eq!(f.chat.call_count(), 3);
    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.status, ContentStatus::Failed);
    assert!(entity.translations.is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn terminal_error_skips_retries() {
    let f = fixture(ScriptedChat::failing_with(vec![AiError::new(
        AiErrorKind::InvalidRequest,
        "bad prompt",
    )]));
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    f.scheduler.submit(JobPayload::TranslateArticle {
        entity_id,
        language: "en".into(),
        force: false,
    });
    f.scheduler.wait_idle().await;

    assert_eq!(f.chat.call_count(), 1);
    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.status, ContentStatus::Failed);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unknown_target_exits_without_provider_calls() {
    let f = fixture(ScriptedChat::always_ok());

    f.scheduler.submit(JobPayload::TranslateArticle {
        entity_id: Uuid::new_v4(),
        language: "en".into(),
        force: false,
    });
    f.scheduler.wait_idle().await;

    assert_eq!(f.chat.call_count(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn duplicate_uniqueness_key_is_rejected_while_active() {
    let f = fixture(ScriptedChat::always_ok());
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    let payload = JobPayload::GenerateInternalLinks {
        entity_id,
        force: false,
    };
    let first = f.scheduler.submit(payload.clone());
    let second = f.scheduler.submit(payload.clone());
    assert!(matches!(first, SubmitOutcome::Enqueued(_)));
    assert_eq!(second, SubmitOutcome::Duplicate);

    f.scheduler.wait_idle().await;

    // Terminal state releases the key: a resubmission is accepted again
    // (and skips as a no-op because the links already exist).
    let third = f.scheduler.submit(payload);
    assert!(matches!(third, SubmitOutcome::Enqueued(_)));
    f.scheduler.wait_idle().await;
    assert_eq!(f.chat.call_count(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn publish_flow_requests_indexing_and_updates_sitemap() {
    let f = fixture(ScriptedChat::always_ok());
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    f.scheduler.submit(JobPayload::PublishArticle {
        entity_id,
        platform: "main-site".into(),
    });
    f.scheduler.wait_idle().await;

    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.status, ContentStatus::Published);
    assert!(entity.published_url.is_some());
    assert_eq!(f.sitemap.len(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn external_link_discovery_stores_citations() {
    let f = fixture(ScriptedChat::always_ok());
    let entity_id = seed_article(&f.repo, Some("Texto original")).await;

    f.scheduler.submit(JobPayload::DiscoverExternalLinks {
        entity_id,
        force: false,
    });
    f.scheduler.wait_idle().await;

    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.external_links.len(), 2);

    f.scheduler
        .submit(JobPayload::VerifyExternalLinks { entity_id });
    f.scheduler.wait_idle().await;
    let entity = f.repo.content(entity_id).await.unwrap().unwrap();
    assert_eq!(entity.external_links.len(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn manual_title_materializes_and_generates() {
    let f = fixture(ScriptedChat::always_ok());
    let title_id = Uuid::new_v4();
    f.repo.seed_title(ManualTitle {
        id: title_id,
        title: "Mejores bombas de calor".into(),
        language: "es".into(),
        country: "ES".into(),
        word_count: 900,
    });

    f.scheduler
        .submit(JobPayload::ProcessManualTitle { title_id });
    f.scheduler.wait_idle().await;

    // One article call plus the fan-out it triggers.
    assert!(f.chat.call_count() >= 1);
    let pending = f.repo.pending_internal_links(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    let entity = f.repo.content(pending[0]).await.unwrap().unwrap();
    assert_eq!(entity.keyword, "Mejores bombas de calor");
    assert_eq!(entity.status, ContentStatus::Generated);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn missing_manual_title_is_terminal_without_provider_calls() {
    let f = fixture(ScriptedChat::always_ok());
    f.scheduler.submit(JobPayload::ProcessManualTitle {
        title_id: Uuid::new_v4(),
    });
    f.scheduler.wait_idle().await;
    assert_eq!(f.chat.call_count(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn program_tick_plans_and_generates_items() {
    let f = fixture(ScriptedChat::always_ok());
    let program_id = Uuid::new_v4();
    f.repo.seed_program(ProgramSpec {
        id: program_id,
        planned: vec![
            PlannedItem {
                kind: ContentKind::Article,
                keyword: "autoconsumo industrial".into(),
                language: "es".into(),
                country: "ES".into(),
                word_count: 1500,
            },
            PlannedItem {
                kind: ContentKind::Comparative,
                keyword: "inversores hibridos comparativa".into(),
                language: "es".into(),
                country: "ES".into(),
                word_count: 2000,
            },
        ],
    });

    f.scheduler
        .submit(JobPayload::ProcessProgram { program_id });
    f.scheduler.wait_idle().await;

    let generated = f.repo.pending_internal_links(10).await.unwrap();
    assert_eq!(generated.len(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn batch_expands_into_generation_jobs() {
    let f = fixture(ScriptedChat::always_ok());
    let first = seed_article(&f.repo, None).await;
    let landing = ContentEntity::new(ContentKind::Landing, "aerotermia precio", "es", "ES", 800);
    let second = landing.id;
    f.repo.insert_content(landing).await.unwrap();
    let batch_id = Uuid::new_v4();
    f.repo.seed_batch(BatchSpec {
        id: batch_id,
        entity_ids: vec![first, second],
    });

    f.scheduler
        .submit(JobPayload::ProcessBatchGeneration { batch_id });
    f.scheduler.wait_idle().await;

    for id in [first, second] {
        let entity = f.repo.content(id).await.unwrap().unwrap();
        assert_eq!(entity.status, ContentStatus::Generated, "{id}");
        assert!(entity.body.is_some());
    }
}

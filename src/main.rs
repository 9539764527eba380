//! contentpipe entrypoint: load config, assemble the pipeline, start the
//! scheduler workers and serve the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contentpipe::ai::{AiGateway, DalleProvider, OpenAiChat, PerplexitySearch};
use contentpipe::ai::{ImageProvider, SearchProvider};
use contentpipe::api::{serve, AppState};
use contentpipe::budget::{BudgetGovernor, CostLedger, LogAlertSink};
use contentpipe::cache::ContentCache;
use contentpipe::config::Config;
use contentpipe::domain::{
    HttpLinkChecker, HttpPublisher, InMemoryRepository, InMemorySitemap, LogIndexingClient,
    LogPublisher, Publisher,
};
use contentpipe::jobs::{PipelineContext, Scheduler};

/// How often budget thresholds are re-evaluated for alerting.
const ALERT_CHECK_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,contentpipe=debug")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "contentpipe.yaml".to_string());
    let config = Arc::new(
        Config::load(&PathBuf::from(&config_path))
            .with_context(|| format!("loading config from {config_path}"))?,
    );

    let ledger = Arc::new(CostLedger::open(
        &config.ledger_path,
        config.timezone_offset_hours,
    )?);
    let governor = Arc::new(BudgetGovernor::new(
        config.budget.clone(),
        Arc::clone(&ledger),
        Arc::new(LogAlertSink),
        config.timezone_offset_hours,
    ));

    let chat = Arc::new(OpenAiChat::from_config(&config.providers)?);
    let image = DalleProvider::from_config(&config.providers)
        .map(|provider| Arc::new(provider) as Arc<dyn ImageProvider>);
    let search = PerplexitySearch::from_config(&config.providers)
        .map(|provider| Arc::new(provider) as Arc<dyn SearchProvider>);
    if image.is_none() {
        info!("image generation disabled: no DALL-E key configured");
    }
    if search.is_none() {
        info!("search disabled: no Perplexity key configured");
    }

    let gateway = Arc::new(AiGateway::new(
        chat,
        image,
        search,
        Arc::clone(&governor),
        Arc::clone(&ledger),
        config.cache.clone(),
    ));
    let cache = Arc::new(ContentCache::new(
        config.cache.clone(),
        config.timezone_offset_hours,
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.providers.request_timeout_secs))
        .build()
        .context("building shared HTTP client")?;

    let publisher: Arc<dyn Publisher> = match &config.pipeline.publish_endpoint {
        Some(endpoint) => Arc::new(HttpPublisher::new(http.clone(), endpoint.clone())),
        None => Arc::new(LogPublisher),
    };

    let ctx = Arc::new(PipelineContext {
        config: Arc::clone(&config),
        gateway,
        cache,
        ledger,
        governor: Arc::clone(&governor),
        repo: Arc::new(InMemoryRepository::new()),
        publisher,
        indexer: Arc::new(LogIndexingClient),
        sitemap: Arc::new(InMemorySitemap::new()),
        link_checker: Arc::new(HttpLinkChecker::new(http)),
    });
    let scheduler = Arc::new(Scheduler::start(Arc::clone(&ctx)));

    // Periodic threshold evaluation; alert dedup lives in the governor.
    {
        let governor = Arc::clone(&governor);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ALERT_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                governor.check_and_alert().await;
            }
        });
    }

    let state = AppState {
        ctx,
        scheduler: Arc::clone(&scheduler),
    };
    let listen_addr = config.listen_addr.clone();
    tokio::select! {
        result = serve(state, &listen_addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, stopping workers");
            scheduler.shutdown();
            scheduler.wait_for_shutdown().await;
        }
    }
    Ok(())
}

//! Job orchestration.
//!
//! # Key Concepts
//! - Every job kind carries a fixed policy: attempts, timeout, backoff
//! - Handlers return follow-up jobs; the scheduler performs the fan-out
//! - Uniqueness keys keep singleton work single while a job is non-terminal
//! - Terminal failures run a compensating hook exactly once and never
//!   re-throw into the queue

mod batch;
mod generate;
mod image;
mod links;
mod policy;
mod publish;
mod scheduler;
mod translate;

pub use policy::{JobKind, JobPolicy, Lane, DEFAULT_BACKOFF};
pub use scheduler::{Scheduler, SubmitOutcome};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ai::{AiError, AiGateway};
use crate::budget::{BudgetGovernor, CostLedger};
use crate::cache::ContentCache;
use crate::config::Config;
use crate::domain::{
    ContentRepository, DomainError, IndexingClient, LinkChecker, Publisher, SitemapStore,
};

/// Everything a job handler may touch, shared across workers.
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub gateway: Arc<AiGateway>,
    pub cache: Arc<ContentCache>,
    pub ledger: Arc<CostLedger>,
    pub governor: Arc<BudgetGovernor>,
    pub repo: Arc<dyn ContentRepository>,
    pub publisher: Arc<dyn Publisher>,
    pub indexer: Arc<dyn IndexingClient>,
    pub sitemap: Arc<dyn SitemapStore>,
    pub link_checker: Arc<dyn LinkChecker>,
}

/// Kind-specific parameters of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateArticle {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    GenerateLanding {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    GenerateComparative {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    TranslateArticle {
        entity_id: Uuid,
        language: String,
        #[serde(default)]
        force: bool,
    },
    TranslateAllLanguages {
        entity_id: Uuid,
    },
    TranslatePressRelease {
        entity_id: Uuid,
        language: String,
        #[serde(default)]
        force: bool,
    },
    TranslatePressDossier {
        entity_id: Uuid,
        language: String,
        #[serde(default)]
        force: bool,
    },
    GenerateImage {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    OptimizeImage {
        entity_id: Uuid,
    },
    GenerateInternalLinks {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    GenerateInternalLinksBatch {
        limit: usize,
    },
    DiscoverExternalLinks {
        entity_id: Uuid,
        #[serde(default)]
        force: bool,
    },
    VerifyExternalLinks {
        entity_id: Uuid,
    },
    PublishArticle {
        entity_id: Uuid,
        platform: String,
    },
    ProcessPublication {
        entity_id: Uuid,
        platform: String,
    },
    RequestIndexing {
        url: String,
    },
    UpdateSitemap {
        url: String,
    },
    ProcessBatchGeneration {
        batch_id: Uuid,
    },
    ProcessProgram {
        program_id: Uuid,
    },
    ProcessManualTitle {
        title_id: Uuid,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::GenerateArticle { .. } => JobKind::GenerateArticle,
            Self::GenerateLanding { .. } => JobKind::GenerateLanding,
            Self::GenerateComparative { .. } => JobKind::GenerateComparative,
            Self::TranslateArticle { .. } => JobKind::TranslateArticle,
            Self::TranslateAllLanguages { .. } => JobKind::TranslateAllLanguages,
            Self::TranslatePressRelease { .. } => JobKind::TranslatePressRelease,
            Self::TranslatePressDossier { .. } => JobKind::TranslatePressDossier,
            Self::GenerateImage { .. } => JobKind::GenerateImage,
            Self::OptimizeImage { .. } => JobKind::OptimizeImage,
            Self::GenerateInternalLinks { .. } => JobKind::GenerateInternalLinks,
            Self::GenerateInternalLinksBatch { .. } => JobKind::GenerateInternalLinksBatch,
            Self::DiscoverExternalLinks { .. } => JobKind::DiscoverExternalLinks,
            Self::VerifyExternalLinks { .. } => JobKind::VerifyExternalLinks,
            Self::PublishArticle { .. } => JobKind::PublishArticle,
            Self::ProcessPublication { .. } => JobKind::ProcessPublication,
            Self::RequestIndexing { .. } => JobKind::RequestIndexing,
            Self::UpdateSitemap { .. } => JobKind::UpdateSitemap,
            Self::ProcessBatchGeneration { .. } => JobKind::ProcessBatchGeneration,
            Self::ProcessProgram { .. } => JobKind::ProcessProgram,
            Self::ProcessManualTitle { .. } => JobKind::ProcessManualTitle,
        }
    }

    /// Key preventing a second concurrent non-terminal instance of the
    /// same logical unit of work. Only per-entity singleton jobs carry one.
    pub fn uniqueness_key(&self) -> Option<String> {
        match self {
            Self::TranslateArticle {
                entity_id,
                language,
                ..
            } => Some(format!("translate_{entity_id}_{language}")),
            Self::TranslateAllLanguages { entity_id } => {
                Some(format!("translate_all_{entity_id}"))
            }
            Self::TranslatePressRelease {
                entity_id,
                language,
                ..
            } => Some(format!("press_release_{entity_id}_{language}")),
            Self::TranslatePressDossier {
                entity_id,
                language,
                ..
            } => Some(format!("press_dossier_{entity_id}_{language}")),
            Self::GenerateInternalLinks { entity_id, .. } => {
                Some(format!("internal_links_{entity_id}"))
            }
            Self::DiscoverExternalLinks { entity_id, .. } => {
                Some(format!("external_links_{entity_id}"))
            }
            Self::VerifyExternalLinks { entity_id } => Some(format!("verify_links_{entity_id}")),
            Self::GenerateImage { entity_id, .. } => Some(format!("image_{entity_id}")),
            _ => None,
        }
    }

    /// Whether the caller asked to override idempotency checks.
    pub fn force(&self) -> bool {
        match self {
            Self::GenerateArticle { force, .. }
            | Self::GenerateLanding { force, .. }
            | Self::GenerateComparative { force, .. }
            | Self::TranslateArticle { force, .. }
            | Self::TranslatePressRelease { force, .. }
            | Self::TranslatePressDossier { force, .. }
            | Self::GenerateImage { force, .. }
            | Self::GenerateInternalLinks { force, .. }
            | Self::DiscoverExternalLinks { force, .. } => *force,
            _ => false,
        }
    }

    /// Entity the terminal-failure hook marks as failed.
    pub fn target_entity(&self) -> Option<Uuid> {
        match self {
            Self::GenerateArticle { entity_id, .. }
            | Self::GenerateLanding { entity_id, .. }
            | Self::GenerateComparative { entity_id, .. }
            | Self::TranslateArticle { entity_id, .. }
            | Self::TranslateAllLanguages { entity_id }
            | Self::TranslatePressRelease { entity_id, .. }
            | Self::TranslatePressDossier { entity_id, .. }
            | Self::GenerateImage { entity_id, .. }
            | Self::OptimizeImage { entity_id }
            | Self::GenerateInternalLinks { entity_id, .. }
            | Self::DiscoverExternalLinks { entity_id, .. }
            | Self::VerifyExternalLinks { entity_id }
            | Self::PublishArticle { entity_id, .. }
            | Self::ProcessPublication { entity_id, .. } => Some(*entity_id),
            _ => None,
        }
    }
}

/// A unit of asynchronous work as the scheduler carries it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    /// 1-based attempt counter maintained by the scheduler.
    pub attempt: u32,
    /// Observability tags attached to every log record for this job.
    pub tags: Vec<String>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let mut tags = vec![payload.kind().as_str().to_string()];
        if let Some(entity) = payload.target_entity() {
            tags.push(entity.to_string());
        }
        Self {
            id: Uuid::new_v4(),
            payload,
            attempt: 1,
            tags,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// A dependent job produced by a completion.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub payload: JobPayload,
    pub delay: Duration,
}

impl FollowUp {
    pub fn now(payload: JobPayload) -> Self {
        Self {
            payload,
            delay: Duration::ZERO,
        }
    }

    pub fn after(payload: JobPayload, delay: Duration) -> Self {
        Self { payload, delay }
    }
}

/// Successful handler result: the fan-out to schedule next.
#[derive(Debug, Default)]
pub struct Completion {
    pub followups: Vec<FollowUp>,
}

impl Completion {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(followups: Vec<FollowUp>) -> Self {
        Self { followups }
    }
}

/// Handler failure, classified for the retry decision.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The referenced entity no longer exists; retrying cannot fix that.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("job timed out")]
    Timeout,
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ai(err) => err.is_retryable(),
            Self::Domain(err) => err.retryable,
            Self::UnknownTarget(_) => false,
            Self::Timeout => true,
        }
    }

    /// Provider-supplied minimum delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Ai(err) => err.retry_after,
            _ => None,
        }
    }
}

/// Route a job to its handler.
pub(crate) async fn dispatch(ctx: &PipelineContext, job: &Job) -> Result<Completion, JobError> {
    match &job.payload {
        JobPayload::GenerateArticle { entity_id, force } => {
            generate::generate_content(ctx, *entity_id, *force).await
        }
        JobPayload::GenerateLanding { entity_id, force } => {
            generate::generate_content(ctx, *entity_id, *force).await
        }
        JobPayload::GenerateComparative { entity_id, force } => {
            generate::generate_content(ctx, *entity_id, *force).await
        }
        JobPayload::TranslateArticle {
            entity_id,
            language,
            force,
        } => translate::translate_one(ctx, *entity_id, language, *force).await,
        JobPayload::TranslateAllLanguages { entity_id } => {
            translate::translate_all(ctx, *entity_id).await
        }
        JobPayload::TranslatePressRelease {
            entity_id,
            language,
            force,
        } => translate::translate_press(ctx, *entity_id, language, *force, false).await,
        JobPayload::TranslatePressDossier {
            entity_id,
            language,
            force,
        } => translate::translate_press(ctx, *entity_id, language, *force, true).await,
        JobPayload::GenerateImage { entity_id, force } => {
            image::generate_image(ctx, *entity_id, *force).await
        }
        JobPayload::OptimizeImage { entity_id } => image::optimize_image(ctx, *entity_id).await,
        JobPayload::GenerateInternalLinks { entity_id, force } => {
            links::generate_internal_links(ctx, *entity_id, *force).await
        }
        JobPayload::GenerateInternalLinksBatch { limit } => {
            links::generate_internal_links_batch(ctx, *limit).await
        }
        JobPayload::DiscoverExternalLinks { entity_id, force } => {
            links::discover_external_links(ctx, *entity_id, *force).await
        }
        JobPayload::VerifyExternalLinks { entity_id } => {
            links::verify_external_links(ctx, *entity_id).await
        }
        JobPayload::PublishArticle {
            entity_id,
            platform,
        } => publish::publish_article(ctx, *entity_id, platform).await,
        JobPayload::ProcessPublication {
            entity_id,
            platform,
        } => publish::process_publication(ctx, *entity_id, platform).await,
        JobPayload::RequestIndexing { url } => publish::request_indexing(ctx, url).await,
        JobPayload::UpdateSitemap { url } => publish::update_sitemap(ctx, url).await,
        JobPayload::ProcessBatchGeneration { batch_id } => {
            batch::process_batch(ctx, *batch_id).await
        }
        JobPayload::ProcessProgram { program_id } => batch::process_program(ctx, *program_id).await,
        JobPayload::ProcessManualTitle { title_id } => {
            batch::process_manual_title(ctx, *title_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kinds_round_trip_through_serde() {
        let payload = JobPayload::TranslateArticle {
            entity_id: Uuid::new_v4(),
            language: "fr".into(),
            force: false,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"translate_article\""));
        let parsed: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), JobKind::TranslateArticle);
    }

    #[test]
    fn singleton_payloads_carry_uniqueness_keys() {
        let id = Uuid::new_v4();
        let payload = JobPayload::GenerateInternalLinks {
            entity_id: id,
            force: false,
        };
        assert_eq!(
            payload.uniqueness_key(),
            Some(format!("internal_links_{id}"))
        );
        assert!(JobPayload::RequestIndexing {
            url: "https://example.com".into()
        }
        .uniqueness_key()
        .is_none());
    }

    #[test]
    fn timeout_and_rate_limit_are_retryable() {
        assert!(JobError::Timeout.is_retryable());
        let rate_limited = JobError::Ai(AiError::new(
            crate::ai::AiErrorKind::RateLimit,
            "slow down",
        ));
        assert!(rate_limited.is_retryable());
        let missing = JobError::UnknownTarget("article 42".into());
        assert!(!missing.is_retryable());
    }
}

//! Publication handlers: queue entry, platform publish, indexing, sitemap.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{ContentStatus, DomainError};

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

/// Enqueue the actual publication work. Kept as its own job so callers get
/// a fast acknowledgement and the slow platform call runs with its own
/// retry policy.
pub(super) async fn publish_article(
    ctx: &PipelineContext,
    entity_id: Uuid,
    platform: &str,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.status != ContentStatus::Generated && entity.status != ContentStatus::Published {
        return Err(DomainError::permanent(format!(
            "content {entity_id} is not ready to publish (status {:?})",
            entity.status
        ))
        .into());
    }

    info!(%entity_id, platform, "publication queued");
    Ok(Completion::with(vec![FollowUp::now(
        JobPayload::ProcessPublication {
            entity_id,
            platform: platform.to_string(),
        },
    )]))
}

/// Perform the platform publish call, then fan out indexing and sitemap
/// maintenance.
pub(super) async fn process_publication(
    ctx: &PipelineContext,
    entity_id: Uuid,
    platform: &str,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.body.is_none() {
        return Err(DomainError::permanent(format!(
            "content {entity_id} has no body to publish"
        ))
        .into());
    }

    let url = ctx.publisher.publish(&entity).await?;
    ctx.repo.set_published_url(entity_id, url.clone()).await?;

    info!(%entity_id, platform, %url, "published");
    Ok(Completion::with(vec![
        FollowUp::now(JobPayload::RequestIndexing { url: url.clone() }),
        FollowUp::now(JobPayload::UpdateSitemap { url }),
    ]))
}

pub(super) async fn request_indexing(
    ctx: &PipelineContext,
    url: &str,
) -> Result<Completion, JobError> {
    ctx.indexer.request_indexing(url).await?;
    info!(%url, "indexing requested");
    Ok(Completion::empty())
}

pub(super) async fn update_sitemap(
    ctx: &PipelineContext,
    url: &str,
) -> Result<Completion, JobError> {
    let lastmod = Utc::now().format("%Y-%m-%d").to_string();
    ctx.sitemap.upsert(url, &lastmod).await?;
    info!(%url, %lastmod, "sitemap updated");
    Ok(Completion::empty())
}

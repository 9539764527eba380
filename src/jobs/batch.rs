//! Batch and program handlers: expand plans into generation jobs.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ContentEntity, ContentKind};

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

fn generation_payload(kind: ContentKind, entity_id: Uuid) -> JobPayload {
    match kind {
        ContentKind::Landing => JobPayload::GenerateLanding {
            entity_id,
            force: false,
        },
        ContentKind::Comparative => JobPayload::GenerateComparative {
            entity_id,
            force: false,
        },
        // Press material is generated through the article path and only
        // differs downstream (translation policies).
        _ => JobPayload::GenerateArticle {
            entity_id,
            force: false,
        },
    }
}

/// Expand a batch into one generation job per member entity.
pub(super) async fn process_batch(
    ctx: &PipelineContext,
    batch_id: Uuid,
) -> Result<Completion, JobError> {
    let batch = ctx
        .repo
        .batch(batch_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("batch {batch_id}")))?;

    let mut followups = Vec::new();
    for entity_id in batch.entity_ids {
        match ctx.repo.content(entity_id).await? {
            Some(entity) => followups.push(FollowUp::now(generation_payload(entity.kind, entity_id))),
            None => {
                warn!(%batch_id, %entity_id, "batch member no longer exists, skipping");
            }
        }
    }
    info!(%batch_id, jobs = followups.len(), "batch expanded");
    Ok(Completion::with(followups))
}

/// Run one program tick: materialize the planned items and enqueue their
/// generation.
pub(super) async fn process_program(
    ctx: &PipelineContext,
    program_id: Uuid,
) -> Result<Completion, JobError> {
    let program = ctx
        .repo
        .program(program_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("program {program_id}")))?;

    let mut followups = Vec::new();
    for item in program.planned {
        let entity = ContentEntity::new(
            item.kind,
            item.keyword,
            item.language,
            item.country,
            item.word_count,
        );
        let entity_id = entity.id;
        let kind = entity.kind;
        ctx.repo.insert_content(entity).await?;
        followups.push(FollowUp::now(generation_payload(kind, entity_id)));
    }
    info!(%program_id, jobs = followups.len(), "program tick planned");
    Ok(Completion::with(followups))
}

/// Turn a manually curated title into an article entity and generate it.
pub(super) async fn process_manual_title(
    ctx: &PipelineContext,
    title_id: Uuid,
) -> Result<Completion, JobError> {
    let title = ctx
        .repo
        .manual_title(title_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("manual title {title_id}")))?;

    let entity = ContentEntity::new(
        ContentKind::Article,
        title.title,
        title.language,
        title.country,
        title.word_count,
    );
    let entity_id = entity.id;
    ctx.repo.insert_content(entity).await?;

    info!(%title_id, %entity_id, "manual title materialized");
    Ok(Completion::with(vec![FollowUp::now(
        JobPayload::GenerateArticle {
            entity_id,
            force: false,
        },
    )]))
}

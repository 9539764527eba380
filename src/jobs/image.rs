//! Image generation and optimization handlers.

use tracing::info;
use uuid::Uuid;

use crate::ai::{ChatMessage, ChatOptions, ChatRequest};
use crate::budget::{ImageQuality, ImageSize, TaskType};

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

/// Build an image prompt on the cheap chat tier, then render it.
pub(super) async fn generate_image(
    ctx: &PipelineContext,
    entity_id: Uuid,
    force: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.image_url.is_some() && !force {
        info!(%entity_id, "image already exists, skipping");
        return Ok(Completion::empty());
    }

    let prompt = ctx
        .gateway
        .chat(
            ChatRequest::new(
                TaskType::ImagePrompt,
                vec![
                    ChatMessage::system(
                        "Write a single concise DALL-E prompt for a photorealistic \
                         editorial header image. No text overlays, no brand names.",
                    ),
                    ChatMessage::user(entity.keyword.clone()),
                ],
            )
            .with_options(ChatOptions {
                temperature: Some(0.4),
                max_tokens: Some(120),
            }),
        )
        .await?;

    let image = ctx
        .gateway
        .generate_image(&prompt.content, ImageSize::Wide, ImageQuality::Standard)
        .await?;
    ctx.repo.set_image(entity_id, image.url).await?;

    let mut followups = Vec::new();
    if ctx.config.pipeline.optimize_images {
        followups.push(FollowUp::now(JobPayload::OptimizeImage { entity_id }));
    }
    info!(%entity_id, cost = image.cost, "image generated");
    Ok(Completion::with(followups))
}

/// Asynchronous format conversion performed by the repository side.
pub(super) async fn optimize_image(
    ctx: &PipelineContext,
    entity_id: Uuid,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.image_url.is_none() {
        info!(%entity_id, "no image to optimize, skipping");
        return Ok(Completion::empty());
    }
    ctx.repo.mark_image_optimized(entity_id).await?;
    info!(%entity_id, "image optimized");
    Ok(Completion::empty())
}

//! Content generation handlers (articles, landings, comparatives).

use tracing::info;
use uuid::Uuid;

use crate::ai::{ChatMessage, ChatOptions, ChatRequest};
use crate::budget::TaskType;
use crate::domain::{ContentKind, ContentStatus};

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

fn task_type_for(kind: ContentKind) -> TaskType {
    match kind {
        ContentKind::Article => TaskType::Article,
        ContentKind::Landing => TaskType::Landing,
        ContentKind::Comparative => TaskType::Comparative,
        ContentKind::PressRelease => TaskType::PressRelease,
        ContentKind::PressDossier => TaskType::PressDossier,
    }
}

/// Generate the body for a content entity, reusing cached content for
/// near-duplicate keywords, then fan out translation and image work.
pub(super) async fn generate_content(
    ctx: &PipelineContext,
    entity_id: Uuid,
    force: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.status == ContentStatus::Generated && entity.body.is_some() && !force {
        info!(%entity_id, "content already generated, skipping");
        return Ok(Completion::empty());
    }

    ctx.repo
        .set_status(entity_id, ContentStatus::Generating)
        .await?;

    let task = task_type_for(entity.kind);
    let word_count = entity.word_count.max(300);
    let messages = vec![
        ChatMessage::system(format!(
            "You are an expert content writer. Write in {} for readers in {}. \
             Return clean markdown without commentary.",
            entity.language, entity.country
        )),
        ChatMessage::user(format!(
            "Write a {word_count}-word {} about \"{}\".",
            task.as_str(),
            entity.keyword
        )),
    ];
    let options = ChatOptions {
        temperature: Some(0.7),
        max_tokens: Some(word_count as u64 * 2),
    };

    let gateway = &ctx.gateway;
    let result = ctx
        .cache
        .get_or_generate(&entity.keyword, &entity.language, &entity.country, || async {
            let request = ChatRequest::new(task, messages)
                .with_options(options)
                .with_word_count_hint(entity.word_count);
            gateway.chat(request).await.map(|outcome| outcome.content)
        })
        .await?;

    ctx.repo.set_body(entity_id, result.content).await?;
    ctx.repo
        .set_status(entity_id, ContentStatus::Generated)
        .await?;

    let mut followups = Vec::new();
    if ctx.config.pipeline.auto_translate {
        followups.push(FollowUp::now(JobPayload::TranslateAllLanguages {
            entity_id,
        }));
    }
    if ctx.config.pipeline.auto_image && ctx.gateway.has_image_provider() {
        followups.push(FollowUp::now(JobPayload::GenerateImage {
            entity_id,
            force: false,
        }));
    }

    info!(
        %entity_id,
        kind = task.as_str(),
        from_cache = result.from_cache,
        similarity = result.similarity,
        followups = followups.len(),
        "content generated"
    );
    Ok(Completion::with(followups))
}

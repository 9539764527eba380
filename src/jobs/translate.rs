//! Translation handlers.
//!
//! `translate_all` fans out one per-language job with an increasing delay
//! offset so the provider never sees the whole burst at once. Individual
//! translations are per-(entity, language) singletons: an existing
//! translation short-circuits unless forced.

use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::ai::{ChatMessage, ChatOptions, ChatRequest};
use crate::budget::TaskType;
use crate::domain::DomainError;

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

/// Fan out one TranslateArticle per active target language, skipping the
/// source language, staggered by the configured per-language delay.
pub(super) async fn translate_all(
    ctx: &PipelineContext,
    entity_id: Uuid,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    let stagger = ctx.config.pipeline.translation_stagger_secs;
    let followups: Vec<FollowUp> = ctx
        .config
        .pipeline
        .active_languages
        .iter()
        .filter(|language| **language != entity.language)
        .enumerate()
        .map(|(index, language)| {
            FollowUp::after(
                JobPayload::TranslateArticle {
                    entity_id,
                    language: language.clone(),
                    force: false,
                },
                Duration::from_secs(stagger * index as u64),
            )
        })
        .collect();

    info!(
        %entity_id,
        languages = followups.len(),
        stagger_secs = stagger,
        "translation fan-out scheduled"
    );
    Ok(Completion::with(followups))
}

/// Translate one entity into one language.
pub(super) async fn translate_one(
    ctx: &PipelineContext,
    entity_id: Uuid,
    language: &str,
    force: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if entity.translations.contains_key(language) && !force {
        info!(%entity_id, language, "translation already exists, skipping");
        return Ok(Completion::empty());
    }
    let body = entity
        .body
        .as_deref()
        .ok_or_else(|| DomainError::permanent(format!("content {entity_id} has no body yet")))?;

    let translated = run_translation(ctx, body, &entity.language, language, TaskType::Translation)
        .await?;
    ctx.repo
        .set_translation(entity_id, language, translated)
        .await?;
    info!(%entity_id, language, "translation stored");
    Ok(Completion::empty())
}

/// Translate press material. Dossiers run on the quality tier with their
/// own retry policy; releases use the standard tier.
pub(super) async fn translate_press(
    ctx: &PipelineContext,
    entity_id: Uuid,
    language: &str,
    force: bool,
    dossier: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("press material {entity_id}")))?;

    if entity.translations.contains_key(language) && !force {
        info!(%entity_id, language, "press translation already exists, skipping");
        return Ok(Completion::empty());
    }
    let body = entity
        .body
        .as_deref()
        .ok_or_else(|| DomainError::permanent(format!("press material {entity_id} is empty")))?;

    let task = if dossier {
        TaskType::PressDossier
    } else {
        TaskType::PressRelease
    };
    let translated = run_translation(ctx, body, &entity.language, language, task).await?;
    ctx.repo
        .set_translation(entity_id, language, translated)
        .await?;
    info!(%entity_id, language, dossier, "press translation stored");
    Ok(Completion::empty())
}

async fn run_translation(
    ctx: &PipelineContext,
    body: &str,
    source: &str,
    target: &str,
    task: TaskType,
) -> Result<String, JobError> {
    let request = ChatRequest::new(
        task,
        vec![
            ChatMessage::system(format!(
                "Translate from {source} to {target}. Preserve markdown structure, \
                 names and numbers. Return only the translation."
            )),
            ChatMessage::user(body.to_string()),
        ],
    )
    .with_options(ChatOptions {
        temperature: Some(0.2),
        max_tokens: None,
    });
    let outcome = ctx.gateway.chat(request).await?;
    Ok(outcome.content)
}

//! Link maintenance handlers: internal linking, external-link discovery
//! and liveness verification.

use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::{ChatMessage, ChatOptions, ChatRequest};
use crate::budget::TaskType;
use crate::domain::DomainError;

use super::{Completion, FollowUp, JobError, JobPayload, PipelineContext};

/// Suggest internal links for one entity. Per-entity singleton: existing
/// links short-circuit unless forced.
pub(super) async fn generate_internal_links(
    ctx: &PipelineContext,
    entity_id: Uuid,
    force: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if !entity.internal_links.is_empty() && !force {
        info!(%entity_id, "internal links already generated, skipping");
        return Ok(Completion::empty());
    }
    let body = entity
        .body
        .as_deref()
        .ok_or_else(|| DomainError::permanent(format!("content {entity_id} has no body yet")))?;

    // The full body is not needed to pick anchors; cap the excerpt so the
    // call stays on the cheap side of the context window.
    let excerpt: String = body.chars().take(6000).collect();
    let outcome = ctx
        .gateway
        .chat(
            ChatRequest::new(
                TaskType::InternalLinks,
                vec![
                    ChatMessage::system(
                        "Suggest internal link anchors for this article. \
                         Return one anchor phrase per line, nothing else.",
                    ),
                    ChatMessage::user(excerpt),
                ],
            )
            .with_options(ChatOptions {
                temperature: Some(0.2),
                max_tokens: Some(300),
            }),
        )
        .await?;

    let links: Vec<String> = outcome
        .content
        .lines()
        .map(|line| line.trim_start_matches(['-', '*', ' ']).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    let count = links.len();
    ctx.repo.set_internal_links(entity_id, links).await?;
    info!(%entity_id, count, "internal links stored");
    Ok(Completion::empty())
}

/// Fan the internal-link backlog out into per-entity jobs.
pub(super) async fn generate_internal_links_batch(
    ctx: &PipelineContext,
    limit: usize,
) -> Result<Completion, JobError> {
    let pending = ctx.repo.pending_internal_links(limit).await?;
    let followups: Vec<FollowUp> = pending
        .into_iter()
        .map(|entity_id| {
            FollowUp::now(JobPayload::GenerateInternalLinks {
                entity_id,
                force: false,
            })
        })
        .collect();
    info!(count = followups.len(), "internal-links backlog dispatched");
    Ok(Completion::with(followups))
}

/// Discover authoritative external links through the search provider.
pub(super) async fn discover_external_links(
    ctx: &PipelineContext,
    entity_id: Uuid,
    force: bool,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    if !entity.external_links.is_empty() && !force {
        info!(%entity_id, "external links already discovered, skipping");
        return Ok(Completion::empty());
    }

    let query = format!(
        "authoritative sources and statistics about {} ({})",
        entity.keyword, entity.country
    );
    let outcome = ctx.gateway.search(&query).await?;
    let count = outcome.citations.len();
    ctx.repo
        .set_external_links(entity_id, outcome.citations)
        .await?;
    info!(%entity_id, count, cost = outcome.cost, "external links stored");
    Ok(Completion::empty())
}

/// Sweep an entity's external links and drop the dead ones.
pub(super) async fn verify_external_links(
    ctx: &PipelineContext,
    entity_id: Uuid,
) -> Result<Completion, JobError> {
    let entity = ctx
        .repo
        .content(entity_id)
        .await?
        .ok_or_else(|| JobError::UnknownTarget(format!("content {entity_id}")))?;

    let mut dead = Vec::new();
    for link in &entity.external_links {
        match ctx.link_checker.is_alive(link).await {
            Ok(true) => {}
            Ok(false) => dead.push(link.clone()),
            Err(err) => {
                warn!(%entity_id, link, error = %err, "link check failed, keeping link");
            }
        }
    }
    let removed = dead.len();
    if !dead.is_empty() {
        ctx.repo.remove_external_links(entity_id, &dead).await?;
    }
    info!(
        %entity_id,
        checked = entity.external_links.len(),
        removed,
        "external links verified"
    );
    Ok(Completion::empty())
}

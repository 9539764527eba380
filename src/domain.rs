//! Domain collaborators.
//!
//! The pipeline does not own content storage or publishing; it talks to
//! them through the traits here. Job handlers perform entity status
//! updates only via [`ContentRepository`], never by reaching into storage
//! directly. The in-memory repository backs tests and single-node runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Failure talking to a collaborator. `retryable` drives job retry policy:
/// transient transport problems are worth another attempt, semantic
/// failures are not.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DomainError {
    pub message: String,
    pub retryable: bool,
}

impl DomainError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    Landing,
    Comparative,
    PressRelease,
    PressDossier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Generating,
    Generated,
    Published,
    Failed,
}

/// A content entity as the pipeline sees it: enough state to schedule
/// work and apply side effects, nothing presentational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntity {
    pub id: Uuid,
    pub kind: ContentKind,
    pub keyword: String,
    pub language: String,
    pub country: String,
    pub word_count: u32,
    pub status: ContentStatus,
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub image_optimized: bool,
    pub translations: HashMap<String, String>,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    pub published_url: Option<String>,
}

impl ContentEntity {
    pub fn new(
        kind: ContentKind,
        keyword: impl Into<String>,
        language: impl Into<String>,
        country: impl Into<String>,
        word_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            keyword: keyword.into(),
            language: language.into(),
            country: country.into(),
            word_count,
            status: ContentStatus::Pending,
            body: None,
            image_url: None,
            image_optimized: false,
            translations: HashMap::new(),
            internal_links: Vec::new(),
            external_links: Vec::new(),
            published_url: None,
        }
    }
}

/// A manually curated title awaiting generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualTitle {
    pub id: Uuid,
    pub title: String,
    pub language: String,
    pub country: String,
    pub word_count: u32,
}

/// A batch of entities to generate together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    pub id: Uuid,
    pub entity_ids: Vec<Uuid>,
}

/// One planned generation inside a program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedItem {
    pub kind: ContentKind,
    pub keyword: String,
    pub language: String,
    pub country: String,
    pub word_count: u32,
}

/// A recurring content program: what to generate on each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub id: Uuid,
    pub planned: Vec<PlannedItem>,
}

/// Content storage collaborator.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn content(&self, id: Uuid) -> Result<Option<ContentEntity>, DomainError>;
    async fn insert_content(&self, entity: ContentEntity) -> Result<(), DomainError>;
    async fn set_status(&self, id: Uuid, status: ContentStatus) -> Result<(), DomainError>;
    async fn set_body(&self, id: Uuid, body: String) -> Result<(), DomainError>;
    async fn set_translation(
        &self,
        id: Uuid,
        language: &str,
        body: String,
    ) -> Result<(), DomainError>;
    async fn set_image(&self, id: Uuid, url: String) -> Result<(), DomainError>;
    async fn mark_image_optimized(&self, id: Uuid) -> Result<(), DomainError>;
    async fn set_internal_links(&self, id: Uuid, links: Vec<String>) -> Result<(), DomainError>;
    async fn set_external_links(&self, id: Uuid, links: Vec<String>) -> Result<(), DomainError>;
    async fn remove_external_links(&self, id: Uuid, dead: &[String]) -> Result<(), DomainError>;
    async fn set_published_url(&self, id: Uuid, url: String) -> Result<(), DomainError>;
    /// Entities still lacking internal links, oldest first.
    async fn pending_internal_links(&self, limit: usize) -> Result<Vec<Uuid>, DomainError>;
    async fn manual_title(&self, id: Uuid) -> Result<Option<ManualTitle>, DomainError>;
    async fn batch(&self, id: Uuid) -> Result<Option<BatchSpec>, DomainError>;
    async fn program(&self, id: Uuid) -> Result<Option<ProgramSpec>, DomainError>;
}

/// Platform publishing collaborator. Returns the public URL.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, entity: &ContentEntity) -> Result<String, DomainError>;
}

/// Search-engine indexing collaborator.
#[async_trait]
pub trait IndexingClient: Send + Sync {
    async fn request_indexing(&self, url: &str) -> Result<(), DomainError>;
}

/// Sitemap maintenance collaborator.
#[async_trait]
pub trait SitemapStore: Send + Sync {
    async fn upsert(&self, url: &str, lastmod: &str) -> Result<(), DomainError>;
}

/// External-link liveness collaborator.
#[async_trait]
pub trait LinkChecker: Send + Sync {
    async fn is_alive(&self, url: &str) -> Result<bool, DomainError>;
}

/// In-memory repository for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryRepository {
    contents: RwLock<HashMap<Uuid, ContentEntity>>,
    titles: RwLock<HashMap<Uuid, ManualTitle>>,
    batches: RwLock<HashMap<Uuid, BatchSpec>>,
    programs: RwLock<HashMap<Uuid, ProgramSpec>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_title(&self, title: ManualTitle) {
        self.titles.write().unwrap().insert(title.id, title);
    }

    pub fn seed_batch(&self, batch: BatchSpec) {
        self.batches.write().unwrap().insert(batch.id, batch);
    }

    pub fn seed_program(&self, program: ProgramSpec) {
        self.programs.write().unwrap().insert(program.id, program);
    }

    fn update<R>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut ContentEntity) -> R,
    ) -> Result<R, DomainError> {
        let mut contents = self.contents.write().unwrap();
        let entity = contents
            .get_mut(&id)
            .ok_or_else(|| DomainError::permanent(format!("content {id} not found")))?;
        Ok(apply(entity))
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn content(&self, id: Uuid) -> Result<Option<ContentEntity>, DomainError> {
        Ok(self.contents.read().unwrap().get(&id).cloned())
    }

    async fn insert_content(&self, entity: ContentEntity) -> Result<(), DomainError> {
        self.contents.write().unwrap().insert(entity.id, entity);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ContentStatus) -> Result<(), DomainError> {
        self.update(id, |e| e.status = status)
    }

    async fn set_body(&self, id: Uuid, body: String) -> Result<(), DomainError> {
        self.update(id, |e| e.body = Some(body))
    }

    async fn set_translation(
        &self,
        id: Uuid,
        language: &str,
        body: String,
    ) -> Result<(), DomainError> {
        self.update(id, |e| {
            e.translations.insert(language.to_string(), body);
        })
    }

    async fn set_image(&self, id: Uuid, url: String) -> Result<(), DomainError> {
        self.update(id, |e| e.image_url = Some(url))
    }

    async fn mark_image_optimized(&self, id: Uuid) -> Result<(), DomainError> {
        self.update(id, |e| e.image_optimized = true)
    }

    async fn set_internal_links(&self, id: Uuid, links: Vec<String>) -> Result<(), DomainError> {
        self.update(id, |e| e.internal_links = links)
    }

    async fn set_external_links(&self, id: Uuid, links: Vec<String>) -> Result<(), DomainError> {
        self.update(id, |e| e.external_links = links)
    }

    async fn remove_external_links(&self, id: Uuid, dead: &[String]) -> Result<(), DomainError> {
        self.update(id, |e| e.external_links.retain(|l| !dead.contains(l)))
    }

    async fn set_published_url(&self, id: Uuid, url: String) -> Result<(), DomainError> {
        self.update(id, |e| {
            e.published_url = Some(url);
            e.status = ContentStatus::Published;
        })
    }

    async fn pending_internal_links(&self, limit: usize) -> Result<Vec<Uuid>, DomainError> {
        let contents = self.contents.read().unwrap();
        Ok(contents
            .values()
            .filter(|e| e.internal_links.is_empty() && e.status == ContentStatus::Generated)
            .take(limit)
            .map(|e| e.id)
            .collect())
    }

    async fn manual_title(&self, id: Uuid) -> Result<Option<ManualTitle>, DomainError> {
        Ok(self.titles.read().unwrap().get(&id).cloned())
    }

    async fn batch(&self, id: Uuid) -> Result<Option<BatchSpec>, DomainError> {
        Ok(self.batches.read().unwrap().get(&id).cloned())
    }

    async fn program(&self, id: Uuid) -> Result<Option<ProgramSpec>, DomainError> {
        Ok(self.programs.read().unwrap().get(&id).cloned())
    }
}

/// Publisher that only logs; stands in when no platform endpoint is
/// configured.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, entity: &ContentEntity) -> Result<String, DomainError> {
        let url = format!(
            "https://{}.example.com/{}",
            entity.country.to_lowercase(),
            crate::cache::normalize_keyword(&entity.keyword, &entity.language).replace(' ', "-")
        );
        info!(entity_id = %entity.id, %url, "publish (log-only)");
        Ok(url)
    }
}

/// Thin HTTP publisher posting the entity to a platform endpoint.
pub struct HttpPublisher {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, entity: &ContentEntity) -> Result<String, DomainError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(entity)
            .send()
            .await
            .map_err(|e| DomainError::transient(format!("publish request failed: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(DomainError::transient(format!("publish failed: {status}")));
        }
        if !status.is_success() {
            return Err(DomainError::permanent(format!("publish rejected: {status}")));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DomainError::permanent(format!("publish response malformed: {e}")))?;
        body.get("url")
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .ok_or_else(|| DomainError::permanent("publish response missing url"))
    }
}

/// Indexing client that only logs; real deployments swap in the search
/// console integration.
pub struct LogIndexingClient;

#[async_trait]
impl IndexingClient for LogIndexingClient {
    async fn request_indexing(&self, url: &str) -> Result<(), DomainError> {
        info!(%url, "indexing requested (log-only)");
        Ok(())
    }
}

/// In-memory sitemap store.
#[derive(Default)]
pub struct InMemorySitemap {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemorySitemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SitemapStore for InMemorySitemap {
    async fn upsert(&self, url: &str, lastmod: &str) -> Result<(), DomainError> {
        self.entries
            .write()
            .unwrap()
            .insert(url.to_string(), lastmod.to_string());
        Ok(())
    }
}

/// Link checker doing a HEAD request per URL.
pub struct HttpLinkChecker {
    http: reqwest::Client,
}

impl HttpLinkChecker {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl LinkChecker for HttpLinkChecker {
    async fn is_alive(&self, url: &str) -> Result<bool, DomainError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DomainError::permanent(format!("invalid url {url}: {e}")))?;
        match self.http.head(parsed).send().await {
            Ok(response) => Ok(!response.status().is_client_error()),
            // Connection failures count as dead, not as job failures.
            Err(_) => Ok(false),
        }
    }
}

//! Per-kind job policies: attempts, timeout, backoff, queue lane.
//!
//! The backoff list holds one delay per retry; when a job has more retries
//! than entries the last entry repeats. An empty list means immediate
//! re-enqueue (or none at all when max_attempts is 1).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default backoff for generation jobs that do not declare their own.
pub const DEFAULT_BACKOFF: &[u64] = &[60, 120, 240];

/// Named queue a job executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Generation,
    Translations,
    Publishing,
    Maintenance,
}

impl Lane {
    pub const ALL: [Lane; 4] = [
        Lane::Generation,
        Lane::Translations,
        Lane::Publishing,
        Lane::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Translations => "translations",
            Self::Publishing => "publishing",
            Self::Maintenance => "maintenance",
        }
    }
}

/// Retry/timeout policy of one job kind.
#[derive(Debug, Clone, Copy)]
pub struct JobPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: &'static [u64],
}

impl JobPolicy {
    const fn new(max_attempts: u32, timeout_secs: u64, backoff: &'static [u64]) -> Self {
        Self {
            max_attempts,
            timeout: Duration::from_secs(timeout_secs),
            backoff,
        }
    }

    /// Delay before the retry following `attempt` (1-based). The last
    /// backoff entry repeats for attempts beyond the list.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        Duration::from_secs(self.backoff[index])
    }
}

/// All job kinds the pipeline schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    GenerateArticle,
    GenerateLanding,
    GenerateComparative,
    TranslateArticle,
    TranslateAllLanguages,
    TranslatePressRelease,
    TranslatePressDossier,
    GenerateImage,
    OptimizeImage,
    GenerateInternalLinks,
    GenerateInternalLinksBatch,
    DiscoverExternalLinks,
    VerifyExternalLinks,
    PublishArticle,
    ProcessPublication,
    RequestIndexing,
    UpdateSitemap,
    ProcessBatchGeneration,
    ProcessProgram,
    ProcessManualTitle,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateArticle => "generate_article",
            Self::GenerateLanding => "generate_landing",
            Self::GenerateComparative => "generate_comparative",
            Self::TranslateArticle => "translate_article",
            Self::TranslateAllLanguages => "translate_all_languages",
            Self::TranslatePressRelease => "translate_press_release",
            Self::TranslatePressDossier => "translate_press_dossier",
            Self::GenerateImage => "generate_image",
            Self::OptimizeImage => "optimize_image",
            Self::GenerateInternalLinks => "generate_internal_links",
            Self::GenerateInternalLinksBatch => "generate_internal_links_batch",
            Self::DiscoverExternalLinks => "discover_external_links",
            Self::VerifyExternalLinks => "verify_external_links",
            Self::PublishArticle => "publish_article",
            Self::ProcessPublication => "process_publication",
            Self::RequestIndexing => "request_indexing",
            Self::UpdateSitemap => "update_sitemap",
            Self::ProcessBatchGeneration => "process_batch_generation",
            Self::ProcessProgram => "process_program",
            Self::ProcessManualTitle => "process_manual_title",
        }
    }

    pub fn policy(&self) -> JobPolicy {
        match self {
            Self::GenerateArticle => JobPolicy::new(3, 300, DEFAULT_BACKOFF),
            Self::GenerateLanding => JobPolicy::new(3, 300, DEFAULT_BACKOFF),
            Self::GenerateComparative => JobPolicy::new(3, 600, DEFAULT_BACKOFF),
            Self::TranslateArticle => JobPolicy::new(3, 180, &[30, 60, 120]),
            Self::TranslateAllLanguages => JobPolicy::new(1, 60, &[]),
            Self::TranslatePressRelease => JobPolicy::new(3, 180, &[30, 60, 120]),
            Self::TranslatePressDossier => JobPolicy::new(3, 600, &[60, 180, 300]),
            Self::GenerateImage => JobPolicy::new(3, 120, &[30, 60, 120]),
            Self::OptimizeImage => JobPolicy::new(3, 120, &[30]),
            Self::GenerateInternalLinks => JobPolicy::new(3, 120, &[30, 60, 120]),
            Self::GenerateInternalLinksBatch => JobPolicy::new(2, 3600, &[]),
            Self::DiscoverExternalLinks => JobPolicy::new(3, 180, &[60, 120, 300]),
            Self::VerifyExternalLinks => JobPolicy::new(2, 3600, &[]),
            Self::PublishArticle => JobPolicy::new(3, 60, &[30, 120, 300]),
            Self::ProcessPublication => JobPolicy::new(3, 60, &[]),
            Self::RequestIndexing => JobPolicy::new(3, 60, &[]),
            Self::UpdateSitemap => JobPolicy::new(2, 120, &[]),
            Self::ProcessBatchGeneration => JobPolicy::new(1, 7200, &[]),
            Self::ProcessProgram => JobPolicy::new(3, 7200, &[30, 120, 300]),
            Self::ProcessManualTitle => JobPolicy::new(3, 600, &[30, 120, 300]),
        }
    }

    pub fn lane(&self) -> Lane {
        match self {
            Self::GenerateArticle
            | Self::GenerateLanding
            | Self::GenerateComparative
            | Self::GenerateImage
            | Self::OptimizeImage
            | Self::ProcessBatchGeneration
            | Self::ProcessProgram
            | Self::ProcessManualTitle => Lane::Generation,
            Self::TranslateArticle
            | Self::TranslateAllLanguages
            | Self::TranslatePressRelease
            | Self::TranslatePressDossier => Lane::Translations,
            Self::PublishArticle
            | Self::ProcessPublication
            | Self::RequestIndexing
            | Self::UpdateSitemap => Lane::Publishing,
            Self::GenerateInternalLinks
            | Self::GenerateInternalLinksBatch
            | Self::DiscoverExternalLinks
            | Self::VerifyExternalLinks => Lane::Maintenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table_matches_operational_values() {
        let p = JobKind::TranslateArticle.policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.timeout, Duration::from_secs(180));
        assert_eq!(p.backoff, &[30, 60, 120]);

        let p = JobKind::TranslateAllLanguages.policy();
        assert_eq!(p.max_attempts, 1);
        assert!(p.backoff.is_empty());

        let p = JobKind::ProcessBatchGeneration.policy();
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.timeout, Duration::from_secs(7200));

        let p = JobKind::PublishArticle.policy();
        assert_eq!(p.backoff, &[30, 120, 300]);
    }

    #[test]
    fn backoff_delay_steps_then_repeats_last() {
        let policy = JobKind::GenerateImage.policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(120));
        assert_eq!(policy.backoff_delay(9), Duration::from_secs(120));

        let flat = JobKind::OptimizeImage.policy();
        assert_eq!(flat.backoff_delay(1), Duration::from_secs(30));
        assert_eq!(flat.backoff_delay(2), Duration::from_secs(30));

        let none = JobKind::RequestIndexing.policy();
        assert_eq!(none.backoff_delay(1), Duration::ZERO);
    }

    #[test]
    fn every_kind_maps_to_a_lane() {
        for kind in [
            JobKind::GenerateArticle,
            JobKind::TranslateArticle,
            JobKind::PublishArticle,
            JobKind::VerifyExternalLinks,
        ] {
            assert!(Lane::ALL.contains(&kind.lane()));
        }
    }
}

//! Static model price tables and task-to-model selection.
//!
//! Every cost figure in the pipeline originates here: pre-call estimates,
//! post-call actuals from usage counts, image prices and search fees. Values
//! are per 1K tokens in USD and may drift from provider pricing — update as
//! needed.

use serde::{Deserialize, Serialize};

/// Cheapest tier: short content, translations, metadata.
const MODEL_MINI: &str = "gpt-4o-mini";
/// Balanced default tier.
const MODEL_STANDARD: &str = "gpt-4o";
/// Quality tier: pillar content, deep research, press dossiers.
const MODEL_QUALITY: &str = "gpt-4";

/// A selected model with its per-1K-token price pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelChoice {
    pub model: &'static str,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

const MINI: ModelChoice = ModelChoice {
    model: MODEL_MINI,
    input_per_1k: 0.00015,
    output_per_1k: 0.0006,
};

const STANDARD: ModelChoice = ModelChoice {
    model: MODEL_STANDARD,
    input_per_1k: 0.0025,
    output_per_1k: 0.01,
};

const QUALITY: ModelChoice = ModelChoice {
    model: MODEL_QUALITY,
    input_per_1k: 0.03,
    output_per_1k: 0.06,
};

/// Category of generation work, used to pick a model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Translation,
    Meta,
    Faq,
    ImagePrompt,
    Pillar,
    DeepResearch,
    PressDossier,
    Article,
    Landing,
    Comparative,
    InternalLinks,
    PressRelease,
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Meta => "meta",
            Self::Faq => "faq",
            Self::ImagePrompt => "image_prompt",
            Self::Pillar => "pillar",
            Self::DeepResearch => "deep_research",
            Self::PressDossier => "press_dossier",
            Self::Article => "article",
            Self::Landing => "landing",
            Self::Comparative => "comparative",
            Self::InternalLinks => "internal_links",
            Self::PressRelease => "press_release",
            Self::Unknown => "unknown",
        }
    }
}

/// Pick the optimal model for a task.
///
/// Articles are tiered by expected length: long pieces justify the quality
/// model, short ones run on the cheapest tier. Unknown task types fall back
/// to the standard tier.
pub fn select_model(task: TaskType, word_count_hint: Option<u32>) -> ModelChoice {
    match task {
        TaskType::Translation | TaskType::Meta | TaskType::Faq | TaskType::ImagePrompt => MINI,
        TaskType::Pillar | TaskType::DeepResearch | TaskType::PressDossier => QUALITY,
        TaskType::Article => match word_count_hint {
            Some(words) if words > 2500 => QUALITY,
            Some(words) if words < 500 => MINI,
            _ => STANDARD,
        },
        TaskType::Landing
        | TaskType::Comparative
        | TaskType::InternalLinks
        | TaskType::PressRelease
        | TaskType::Unknown => STANDARD,
    }
}

/// Round to the 6-decimal precision cost events are stored with.
pub(crate) fn round6(amount: f64) -> f64 {
    (amount * 1_000_000.0).round() / 1_000_000.0
}

/// Estimate the USD cost of a call before making it.
///
/// Pure arithmetic over the static price table; deterministic and
/// monotonically non-decreasing in both token counts.
pub fn estimate_cost(choice: &ModelChoice, input_tokens: u64, output_tokens: u64) -> f64 {
    round6(
        (input_tokens as f64 / 1000.0) * choice.input_per_1k
            + (output_tokens as f64 / 1000.0) * choice.output_per_1k,
    )
}

/// DALL-E image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1792x1024")]
    Wide,
    #[serde(rename = "1024x1792")]
    Tall,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Wide => "1792x1024",
            Self::Tall => "1024x1792",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Standard,
    Hd,
}

/// Per-image price for DALL-E 3.
pub fn image_price(size: ImageSize, quality: ImageQuality) -> f64 {
    match (size, quality) {
        (ImageSize::Square, ImageQuality::Standard) => 0.04,
        (ImageSize::Square, ImageQuality::Hd) => 0.08,
        (_, ImageQuality::Standard) => 0.08,
        (_, ImageQuality::Hd) => 0.12,
    }
}

/// Search request fee plus token cost (Perplexity sonar).
pub fn search_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    const REQUEST_FEE: f64 = 0.005;
    const PER_1K: f64 = 0.001;
    round6(REQUEST_FEE + ((input_tokens + output_tokens) as f64 / 1000.0) * PER_1K)
}

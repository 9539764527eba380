//! Similarity-based content reuse.
//!
//! The content cache sits in front of text generation and trades a
//! character-level similarity score against a reuse threshold. Keywords are
//! normalized (lowercased, de-accented, naively singularized) to form the
//! storage key, but similarity is computed against the *original* keyword
//! strings. That asymmetry is inherited behavior kept on purpose; see
//! DESIGN.md before "fixing" it.
//!
//! This component never touches the network: the generator closure is
//! supplied by the caller, keeping this a pure decision + storage layer.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::RwLock;

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::config::CacheConfig;

/// Result of a cache-or-generate decision.
#[derive(Debug, Clone)]
pub struct CacheResult {
    pub content: String,
    pub from_cache: bool,
    /// Similarity of the best candidate found, hit or not.
    pub similarity: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    normalized: String,
    original_keyword: String,
    content: String,
    created_at: DateTime<FixedOffset>,
}

/// Per-(language, country) bucketed reuse store.
pub struct ContentCache {
    config: CacheConfig,
    offset: FixedOffset,
    buckets: RwLock<HashMap<(String, String), VecDeque<CacheEntry>>>,
}

impl ContentCache {
    pub fn new(config: CacheConfig, timezone_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(timezone_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("UTC offset"));
        Self {
            config,
            offset,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Return adapted cached content when a close-enough keyword was already
    /// generated; otherwise run the generator and remember its output.
    pub async fn get_or_generate<F, Fut, E>(
        &self,
        keyword: &str,
        language: &str,
        country: &str,
        generator: F,
    ) -> Result<CacheResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if !self.config.enabled {
            let content = generator().await?;
            return Ok(CacheResult {
                content,
                from_cache: false,
                similarity: 0.0,
            });
        }

        let bucket_key = (language.to_string(), country.to_string());
        let best = {
            let buckets = self.buckets.read().expect("cache lock poisoned");
            buckets.get(&bucket_key).and_then(|bucket| {
                // Flat linear scan; acceptable at the configured bucket cap.
                let mut best: Option<(f64, &CacheEntry)> = None;
                for entry in bucket {
                    let score = similarity(keyword, &entry.original_keyword);
                    if best.as_ref().is_none_or(|(top, _)| score > *top) {
                        best = Some((score, entry));
                    }
                }
                best.map(|(score, entry)| (score, entry.clone()))
            })
        };

        if let Some((score, entry)) = &best {
            if *score >= self.config.similarity_threshold {
                info!(
                    keyword,
                    cached_keyword = %entry.original_keyword,
                    similarity = score,
                    language,
                    country,
                    "content cache hit"
                );
                let content =
                    adapt_content(&entry.content, &entry.original_keyword, keyword, self.now());
                return Ok(CacheResult {
                    content,
                    from_cache: true,
                    similarity: *score,
                });
            }
        }

        let best_score = best.as_ref().map(|(score, _)| *score).unwrap_or(0.0);
        debug!(keyword, language, country, best_score, "content cache miss");
        let content = generator().await?;
        self.insert(bucket_key, keyword, language, &content);
        Ok(CacheResult {
            content,
            from_cache: false,
            similarity: best_score,
        })
    }

    fn insert(&self, bucket_key: (String, String), keyword: &str, language: &str, content: &str) {
        let normalized = normalize_keyword(keyword, language);
        let entry = CacheEntry {
            normalized: normalized.clone(),
            original_keyword: keyword.to_string(),
            content: content.to_string(),
            created_at: self.now(),
        };
        let mut buckets = self.buckets.write().expect("cache lock poisoned");
        let bucket = buckets.entry(bucket_key).or_default();
        if let Some(existing) = bucket.iter_mut().find(|e| e.normalized == normalized) {
            *existing = entry;
            return;
        }
        if bucket.len() >= self.config.max_entries_per_bucket {
            // Entries are pushed in creation order, so the front is oldest.
            bucket.pop_front();
        }
        bucket.push_back(entry);
    }

    /// Number of entries in one bucket (observability, tests).
    pub fn bucket_len(&self, language: &str, country: &str) -> usize {
        self.buckets
            .read()
            .expect("cache lock poisoned")
            .get(&(language.to_string(), country.to_string()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

/// Normalize a keyword into its storage key: lowercase, strip diacritics,
/// singularize per language, drop everything but alphanumerics, spaces and
/// hyphens, collapse whitespace.
pub fn normalize_keyword(keyword: &str, language: &str) -> String {
    let lowered = keyword.to_lowercase();
    let stripped: String = lowered
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    let singularized = stripped
        .split_whitespace()
        .map(|word| singularize(word, language))
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned: String = singularized
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20FF}')
}

/// Naive per-language suffix singularization. Deliberately crude: the goal
/// is key collision between singular/plural forms, not linguistics.
fn singularize(word: &str, language: &str) -> String {
    let n = word.chars().count();
    match language {
        "en" => {
            if n > 4 && word.ends_with("ies") {
                format!("{}y", &word[..word.len() - 3])
            } else if n > 4
                && (word.ends_with("ches")
                    || word.ends_with("shes")
                    || word.ends_with("xes")
                    || word.ends_with("ses"))
            {
                word[..word.len() - 2].to_string()
            } else {
                strip_plural_s(word)
            }
        }
        "es" => {
            if n > 4 && word.ends_with("ces") {
                format!("{}z", &word[..word.len() - 3])
            } else if n > 4 && word.ends_with("es") {
                word[..word.len() - 2].to_string()
            } else {
                strip_plural_s(word)
            }
        }
        "fr" => {
            if n > 4 && word.ends_with("aux") {
                format!("{}al", &word[..word.len() - 3])
            } else if n > 3 && word.ends_with('x') {
                word[..word.len() - 1].to_string()
            } else {
                strip_plural_s(word)
            }
        }
        "de" => {
            if n > 5 && word.ends_with("en") {
                word[..word.len() - 2].to_string()
            } else {
                word.to_string()
            }
        }
        "pt" => {
            if n > 4 && word.ends_with("oes") {
                format!("{}ao", &word[..word.len() - 3])
            } else {
                strip_plural_s(word)
            }
        }
        _ => strip_plural_s(word),
    }
}

fn strip_plural_s(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Character-level match ratio in [0, 1], computed over lowercased strings:
/// twice the number of matching characters (longest-common-substring
/// recursion) over the combined length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / (a.len() + b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut best_len = 0;
    let mut best_a = 0;
    let mut best_b = 0;
    for i in 0..a.len() {
        for j in 0..b.len() {
            let mut k = 0;
            while i + k < a.len() && j + k < b.len() && a[i + k] == b[j + k] {
                k += 1;
            }
            if k > best_len {
                best_len = k;
                best_a = i;
                best_b = j;
            }
        }
    }
    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_chars(&a[..best_a], &b[..best_b])
        + matching_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}

/// Rewrite cached content for a new keyword: substitute the old keyword
/// preserving the case shape of each occurrence, refresh stale years to the
/// current one, and bump any "last updated" date.
fn adapt_content(
    content: &str,
    old_keyword: &str,
    new_keyword: &str,
    now: DateTime<FixedOffset>,
) -> String {
    let mut adapted = substitute_keyword(content, old_keyword, new_keyword);

    let current_year = now.year();
    if let Ok(year_re) = Regex::new(r"\b(20\d{2})\b") {
        adapted = year_re
            .replace_all(&adapted, |caps: &regex::Captures<'_>| {
                let year: i32 = caps[1].parse().unwrap_or(current_year);
                if (2015..current_year).contains(&year) {
                    current_year.to_string()
                } else {
                    caps[1].to_string()
                }
            })
            .into_owned();
    }

    if let Ok(updated_re) = Regex::new(r"(?i)(last updated:?\s*)\d{4}-\d{2}-\d{2}") {
        let today = now.format("%Y-%m-%d").to_string();
        adapted = updated_re
            .replace_all(&adapted, |caps: &regex::Captures<'_>| {
                format!("{}{}", &caps[1], today)
            })
            .into_owned();
    }

    adapted
}

fn substitute_keyword(content: &str, old_keyword: &str, new_keyword: &str) -> String {
    let Ok(re) = RegexBuilder::new(&regex::escape(old_keyword))
        .case_insensitive(true)
        .build()
    else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        apply_case_shape(&caps[0], new_keyword)
    })
    .into_owned()
}

fn apply_case_shape(template: &str, replacement: &str) -> String {
    let has_lower = template.chars().any(|c| c.is_lowercase());
    let has_upper = template.chars().any(|c| c.is_uppercase());
    if has_upper && !has_lower {
        replacement.to_uppercase()
    } else if template.chars().next().is_some_and(|c| c.is_uppercase()) {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    } else {
        replacement.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn cache() -> ContentCache {
        ContentCache::new(CacheConfig::default(), 0)
    }

    async fn generate_once(
        cache: &ContentCache,
        keyword: &str,
        counter: &AtomicUsize,
    ) -> CacheResult {
        cache
            .get_or_generate(keyword, "es", "ES", || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(format!("Article about {keyword} in 2024."))
            })
            .await
            .unwrap()
    }

    #[test]
    fn normalization_strips_accents_and_plurals() {
        assert_eq!(
            normalize_keyword("Paneles Solares", "es"),
            "panel solar"
        );
        assert_eq!(normalize_keyword("Солнечные", "ru"), "солнечные");
        assert_eq!(normalize_keyword("énergies  vertes", "fr"), "energie verte");
        assert_eq!(normalize_keyword("precio (kWh) 2024!", "es"), "precio kwh 2024");
        assert_eq!(normalize_keyword("Batteries", "en"), "battery");
    }

    #[test]
    fn similarity_is_one_for_identical_strings() {
        assert_eq!(similarity("solar panels", "Solar Panels"), 1.0);
        assert!(similarity("solar panels", "lunar rocks") < 0.95);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("a", ""), 0.0);
    }

    #[tokio::test]
    async fn second_identical_request_is_a_hit() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        let first = generate_once(&cache, "placas solares", &calls).await;
        assert!(!first.from_cache);

        let second = generate_once(&cache, "placas solares", &calls).await;
        assert!(second.from_cache);
        assert_eq!(second.similarity, 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn below_threshold_match_is_a_miss() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        generate_once(&cache, "placas solares", &calls).await;
        let result = generate_once(&cache, "aerotermia barata", &calls).await;
        assert!(!result.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn buckets_are_isolated_by_language_and_country() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        generate_once(&cache, "placas solares", &calls).await;
        cache
            .get_or_generate("placas solares", "fr", "FR", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>("autre".to_string())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eviction_removes_oldest_at_capacity() {
        let config = CacheConfig {
            max_entries_per_bucket: 3,
            ..CacheConfig::default()
        };
        let cache = ContentCache::new(config, 0);
        for keyword in ["alpha uno", "beta dos", "gamma tres", "delta cuatro"] {
            cache
                .get_or_generate(keyword, "es", "ES", || async {
                    Ok::<_, std::convert::Infallible>(format!("text {keyword}"))
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.bucket_len("es", "ES"), 3);

        // The oldest entry was evicted, so it generates again.
        let calls = AtomicUsize::new(0);
        let result = generate_once(&cache, "alpha uno", &calls).await;
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn hit_adapts_keyword_case_and_year() {
        let config = CacheConfig::default();
        let cache = ContentCache::new(config, 0);
        cache
            .get_or_generate("placas solares", "es", "ES", || async {
                Ok::<_, std::convert::Infallible>(
                    "Placas solares guide. Written in 2023. last updated: 2023-01-15".to_string(),
                )
            })
            .await
            .unwrap();

        let hit = cache
            .get_or_generate("Placas Solares", "es", "ES", || async {
                Ok::<_, std::convert::Infallible>(String::new())
            })
            .await
            .unwrap();
        assert!(hit.from_cache);
        assert!(hit.content.starts_with("Placas Solares guide."));
        let current_year = Utc::now().year().to_string();
        assert!(hit.content.contains(&format!("Written in {current_year}")));
        assert!(!hit.content.contains("2023-01-15"));
    }

    #[tokio::test]
    async fn disabled_cache_always_generates() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = ContentCache::new(config, 0);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get_or_generate("kw", "es", "ES", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>("x".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Source registry: the mutable catalog of sites the pipeline scrapes.
//!
//! The registry keeps insertion order and treats `name` as the unique key.
//! It is shared between the HTTP API (which mutates it) and the orchestrator
//! (which takes an atomic snapshot at the start of each run), see
//! [`SharedRegistry`].

use crate::error::{NotFoundError, UpdateError, ValidationError};
use crate::models::{Category, Source};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// A source as submitted for registration; every field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSource {
    pub name: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub weight: Option<f64>,
    #[serde(alias = "selectors")]
    pub extraction_hints: Option<BTreeMap<String, String>>,
    pub description: Option<String>,
}

/// Partial update merged into an existing source. The name is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePatch {
    pub url: Option<String>,
    pub category: Option<String>,
    pub weight: Option<f64>,
    #[serde(alias = "selectors")]
    pub extraction_hints: Option<BTreeMap<String, String>>,
    pub description: Option<String>,
}

/// Check that `raw` is an absolute http(s) url with a host.
pub fn check_url(raw: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    match parsed.host_str() {
        Some(h) if !h.is_empty() => Ok(parsed),
        _ => Err(invalid("missing host")),
    }
}

fn check_weight(weight: f64) -> Result<f64, ValidationError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(ValidationError::InvalidWeight(weight))
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

/// Ordered catalog of [`Source`]s keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-deserialized sources (e.g. the config
    /// file) without validation; use [`SourceRegistry::validate_all`] to
    /// report problems in them.
    pub fn from_sources(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// The built-in catalog of AI, tech and Mac-tips outlets.
    pub fn with_defaults() -> Self {
        Self::from_sources(DEFAULT_SOURCES.clone())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// All sources in insertion order.
    pub fn list(&self) -> &[Source] {
        &self.sources
    }

    pub fn list_by_category(&self, category: &Category) -> Vec<Source> {
        self.sources
            .iter()
            .filter(|s| &s.category == category)
            .cloned()
            .collect()
    }

    /// Sources by weight, heaviest first; equal weights keep insertion order.
    pub fn list_by_weight_desc(&self) -> Vec<Source> {
        let mut sorted = self.sources.clone();
        sorted.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        sorted
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Register a new source, filling in weight 1.0 and empty hints when absent.
    pub fn add(&mut self, new: NewSource) -> Result<&Source, ValidationError> {
        let name = required(new.name, "name")?;
        let url = required(new.url, "url")?;
        let category = required(new.category, "category")?;
        check_url(&url)?;
        let weight = check_weight(new.weight.unwrap_or(1.0))?;

        if self.get(&name).is_some() {
            return Err(ValidationError::DuplicateName(name));
        }

        info!(source = %name, %url, %category, weight, "Registered source");
        self.sources.push(Source {
            name,
            url,
            category: Category::from(category),
            weight,
            extraction_hints: new.extraction_hints.unwrap_or_default(),
            description: new.description,
        });
        Ok(&self.sources[self.sources.len() - 1])
    }

    /// Remove every source with this name. Removing an unknown name is a no-op.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);
        let removed = before - self.sources.len();
        debug!(source = %name, removed, "Removed source");
        removed
    }

    /// Merge `patch` into the named source. An invalid patch leaves the source untouched.
    pub fn update(&mut self, name: &str, patch: SourcePatch) -> Result<&Source, UpdateError> {
        let idx = self
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| NotFoundError(name.to_string()))?;

        let mut updated = self.sources[idx].clone();
        if let Some(url) = patch.url {
            check_url(&url)?;
            updated.url = url.trim().to_string();
        }
        if let Some(category) = patch.category {
            updated.category = Category::from(required(Some(category), "category")?);
        }
        if let Some(weight) = patch.weight {
            updated.weight = check_weight(weight)?;
        }
        if let Some(hints) = patch.extraction_hints {
            updated.extraction_hints.extend(hints);
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }

        info!(source = %name, "Updated source");
        self.sources[idx] = updated;
        Ok(&self.sources[idx])
    }

    /// Lazily report every problem in the catalog as a readable message.
    pub fn validate_all(&self) -> impl Iterator<Item = String> + '_ {
        self.sources.iter().flat_map(|source| {
            let label = if source.name.trim().is_empty() {
                "<unnamed>".to_string()
            } else {
                source.name.clone()
            };
            let mut problems = Vec::new();
            if source.name.trim().is_empty() {
                problems.push(format!("source with url `{}` has no name", source.url));
            }
            if source.url.trim().is_empty() {
                problems.push(format!("source {label} has no url"));
            } else if let Err(e) = check_url(&source.url) {
                problems.push(format!("source {label}: {e}"));
            }
            if source.category.as_str().trim().is_empty() {
                problems.push(format!("source {label} has no category"));
            }
            problems.into_iter()
        })
    }
}

/// Registry handle shared between the API and the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<RwLock<SourceRegistry>>);

impl SharedRegistry {
    pub fn new(registry: SourceRegistry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    /// Owned copy of the current sources, taken under a single read lock.
    pub async fn snapshot(&self) -> Vec<Source> {
        self.0.read().await.list().to_vec()
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, SourceRegistry> {
        self.0.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, SourceRegistry> {
        self.0.write().await
    }
}

fn source(name: &str, url: &str, category: Category, weight: f64, sel: [&str; 3]) -> Source {
    let mut hints = BTreeMap::new();
    hints.insert("title".to_string(), sel[0].to_string());
    hints.insert("link".to_string(), sel[1].to_string());
    hints.insert("summary".to_string(), sel[2].to_string());
    Source {
        name: name.to_string(),
        url: url.to_string(),
        category,
        weight,
        extraction_hints: hints,
        description: None,
    }
}

const ARTICLE_SEL: [&str; 3] = [".article-title", ".article-title a", ".article-summary"];

static DEFAULT_SOURCES: Lazy<Vec<Source>> = Lazy::new(|| {
    vec![
        source(
            "36氪",
            "https://36kr.com",
            Category::Tech,
            1.0,
            [".article-item-title", ".article-item-title a", ".article-item-summary"],
        ),
        source(
            "虎嗅网",
            "https://www.huxiu.com",
            Category::Tech,
            1.0,
            [".article-item-title", ".article-item-title a", ".article-item-summary"],
        ),
        source("机器之心", "https://www.jiqizhixin.com", Category::Ai, 1.2, ARTICLE_SEL),
        source(
            "AI科技大本营",
            "https://www.csdn.net",
            Category::Ai,
            1.1,
            [".title", ".title a", ".summary"],
        ),
        source("量子位", "https://www.qbitai.com", Category::Ai, 1.3, ARTICLE_SEL),
        source("新智元", "https://www.aiera.cn", Category::Ai, 1.2, ARTICLE_SEL),
        source("AI前线", "https://www.infoq.cn", Category::Ai, 1.1, ARTICLE_SEL),
        source("雷锋网", "https://www.leiphone.com", Category::Tech, 1.0, ARTICLE_SEL),
        source("MacRumors", "https://www.macrumors.com", Category::MacTips, 1.5, ARTICLE_SEL),
        source("Apple Support", "https://support.apple.com", Category::MacTips, 1.8, ARTICLE_SEL),
        source(
            "少数派",
            "https://sspai.com",
            Category::MacTips,
            1.3,
            [".title", ".title a", ".summary"],
        ),
        source("Mac玩儿法", "https://www.waerfa.com", Category::MacTips, 1.2, ARTICLE_SEL),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    fn new_source(name: &str, url: &str, category: &str, weight: Option<f64>) -> NewSource {
        NewSource {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
            category: Some(category.to_string()),
            weight,
            ..Default::default()
        }
    }

    fn registry() -> SourceRegistry {
        let mut r = SourceRegistry::new();
        r.add(new_source("a", "https://a.com", "ai", Some(1.0))).unwrap();
        r.add(new_source("b", "https://b.com", "tech", Some(1.3))).unwrap();
        r.add(new_source("c", "https://c.com", "ai", Some(1.3))).unwrap();
        r.add(new_source("d", "https://d.com", "ai", None)).unwrap();
        r
    }

    fn names(sources: &[Source]) -> Vec<&str> {
        sources.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let r = registry();
        assert_eq!(names(r.list()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_list_by_category_is_stable_filter() {
        let r = registry();
        assert_eq!(names(&r.list_by_category(&Category::Ai)), vec!["a", "c", "d"]);
        assert!(r.list_by_category(&Category::MacTips).is_empty());
    }

    #[test]
    fn test_list_by_weight_desc_breaks_ties_by_insertion() {
        let r = registry();
        assert_eq!(names(&r.list_by_weight_desc()), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_add_applies_defaults() {
        let r = registry();
        let d = r.get("d").unwrap();
        assert_eq!(d.weight, 1.0);
        assert!(d.extraction_hints.is_empty());
    }

    #[test]
    fn test_add_rejects_missing_fields() {
        let mut r = SourceRegistry::new();
        let err = r
            .add(NewSource {
                url: Some("https://x.com".to_string()),
                category: Some("ai".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("name"));

        let err = r
            .add(NewSource {
                name: Some("x".to_string()),
                url: Some("  ".to_string()),
                category: Some("ai".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("url"));

        let err = r
            .add(NewSource {
                name: Some("x".to_string()),
                url: Some("https://x.com".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("category"));
        assert!(r.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicate_name() {
        let mut r = registry();
        let err = r
            .add(new_source("a", "https://other.com", "ai", None))
            .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateName("a".to_string()));
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn test_add_rejects_bad_url_and_weight() {
        let mut r = SourceRegistry::new();
        assert!(matches!(
            r.add(new_source("x", "ftp://x.com", "ai", None)),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert!(matches!(
            r.add(new_source("x", "not a url", "ai", None)),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert!(matches!(
            r.add(new_source("x", "https://x.com", "ai", Some(-1.0))),
            Err(ValidationError::InvalidWeight(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut r = registry();
        assert_eq!(r.remove("b"), 1);
        assert_eq!(r.remove("b"), 0);
        assert_eq!(r.remove("never-existed"), 0);
        assert_eq!(names(r.list()), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_update_merges_patch() {
        let mut r = registry();
        let mut hints = BTreeMap::new();
        hints.insert("title".to_string(), "h2".to_string());
        let updated = r
            .update(
                "a",
                SourcePatch {
                    weight: Some(2.0),
                    extraction_hints: Some(hints),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.weight, 2.0);
        assert_eq!(updated.url, "https://a.com");
        assert_eq!(updated.extraction_hints["title"], "h2");
    }

    #[test]
    fn test_update_unknown_name_is_not_found() {
        let mut r = registry();
        let err = r.update("zzz", SourcePatch::default()).unwrap_err();
        assert_eq!(err, UpdateError::NotFound(NotFoundError("zzz".to_string())));
    }

    #[test]
    fn test_update_with_invalid_url_leaves_source_untouched() {
        let mut r = registry();
        let err = r
            .update(
                "a",
                SourcePatch {
                    url: Some("mailto:x@y.z".to_string()),
                    weight: Some(9.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, UpdateError::Invalid(_)));
        let a = r.get("a").unwrap();
        assert_eq!(a.url, "https://a.com");
        assert_eq!(a.weight, 1.0);
    }

    #[test]
    fn test_validate_all_reports_each_problem() {
        let r = SourceRegistry::from_sources(vec![
            Source {
                name: "ok".to_string(),
                url: "https://ok.com".to_string(),
                category: Category::Ai,
                weight: 1.0,
                extraction_hints: BTreeMap::new(),
                description: None,
            },
            Source {
                name: "".to_string(),
                url: "www.no-scheme.com".to_string(),
                category: Category::Other(String::new()),
                weight: 1.0,
                extraction_hints: BTreeMap::new(),
                description: None,
            },
            Source {
                name: "nourl".to_string(),
                url: "".to_string(),
                category: Category::Tech,
                weight: 1.0,
                extraction_hints: BTreeMap::new(),
                description: None,
            },
        ]);
        let problems: Vec<String> = r.validate_all().collect();
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems[0].contains("has no name"));
        assert!(problems[1].contains("invalid url"));
        assert!(problems[2].contains("has no category"));
        assert!(problems[3].contains("nourl has no url"));
    }

    #[test]
    fn test_validate_all_is_lazy() {
        let r = SourceRegistry::with_defaults();
        let mut it = r.validate_all();
        assert!(it.next().is_none());
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let r = SourceRegistry::with_defaults();
        assert_eq!(r.validate_all().count(), 0);
        assert_eq!(r.list_by_category(&Category::Ai).len(), 5);
        assert_eq!(r.list_by_weight_desc()[0].name, "Apple Support");
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_mutation() {
        let shared = SharedRegistry::new(registry());
        let snap = shared.snapshot().await;
        shared.write().await.remove("a");
        shared
            .write()
            .await
            .add(new_source("e", "https://e.com", "ai", None))
            .unwrap();
        assert_eq!(names(&snap), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&shared.snapshot().await), vec!["b", "c", "d", "e"]);
    }
}

//! Importance ranking.
//!
//! The default strategy is a transparent keyword heuristic: every
//! case-insensitive occurrence of a tiered keyword in the title or summary
//! adds the tier's points (high 3, medium 2, low 1), and the sum is
//! multiplied by the source weight. The strategy is pluggable through
//! [`ScoringStrategy`] so the orchestrator does not depend on it.

use crate::error::ValidationError;
use crate::models::Article;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const HIGH_POINTS: f64 = 3.0;
pub const MEDIUM_POINTS: f64 = 2.0;
pub const LOW_POINTS: f64 = 1.0;

/// Computes the importance of one article. Must be deterministic.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, article: &Article) -> f64;
}

/// Keyword tiers, as they appear in configuration. Missing tiers use the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTiers {
    pub high: Option<Vec<String>>,
    pub medium: Option<Vec<String>>,
    pub low: Option<Vec<String>>,
}

const DEFAULT_HIGH: &[&str] = &[
    "breakthrough",
    "first-ever",
    "landmark",
    "revolutionary",
    "milestone",
    "record-breaking",
    "突破",
    "重大",
    "首次",
    "革命性",
    "里程碑",
    "创新",
    "领先",
];

const DEFAULT_MEDIUM: &[&str] = &[
    "launch",
    "unveil",
    "partnership",
    "funding",
    "investment",
    "acquisition",
    "发布",
    "推出",
    "合作",
    "投资",
    "融资",
    "上市",
];

const DEFAULT_LOW: &[&str] = &[
    "update",
    "fix",
    "improvement",
    "optimization",
    "更新",
    "优化",
    "改进",
    "修复",
    "调整",
];

/// Tiered keyword scorer. Tiers are lowercased and must be disjoint.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    high: Vec<String>,
    medium: Vec<String>,
    low: Vec<String>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        let own = |words: &[&str]| -> Vec<String> { words.iter().map(|w| w.to_string()).collect() };
        Self {
            high: own(DEFAULT_HIGH),
            medium: own(DEFAULT_MEDIUM),
            low: own(DEFAULT_LOW),
        }
    }
}

impl KeywordScorer {
    pub fn new(
        high: Vec<String>,
        medium: Vec<String>,
        low: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let clean = |words: Vec<String>| -> Vec<String> {
            words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        let scorer = Self {
            high: clean(high),
            medium: clean(medium),
            low: clean(low),
        };

        let mut owner: HashMap<&str, &'static str> = HashMap::new();
        for (tier, words) in [
            ("high", &scorer.high),
            ("medium", &scorer.medium),
            ("low", &scorer.low),
        ] {
            for w in words {
                match owner.get(w.as_str()) {
                    Some(first) if *first != tier => {
                        return Err(ValidationError::OverlappingKeyword {
                            keyword: w.clone(),
                            first: *first,
                            second: tier,
                        });
                    }
                    _ => {
                        owner.insert(w.as_str(), tier);
                    }
                }
            }
        }
        Ok(scorer)
    }

    /// Defaults with any configured tiers replacing the built-in ones.
    pub fn from_tiers(tiers: &KeywordTiers) -> Result<Self, ValidationError> {
        let defaults = Self::default();
        Self::new(
            tiers.high.clone().unwrap_or(defaults.high),
            tiers.medium.clone().unwrap_or(defaults.medium),
            tiers.low.clone().unwrap_or(defaults.low),
        )
    }

    /// Unweighted keyword points for one piece of text.
    fn points(&self, text: &str) -> f64 {
        let text = text.to_lowercase();
        let hits = |words: &[String]| -> f64 {
            words.iter().map(|w| text.matches(w.as_str()).count()).sum::<usize>() as f64
        };
        hits(&self.high) * HIGH_POINTS
            + hits(&self.medium) * MEDIUM_POINTS
            + hits(&self.low) * LOW_POINTS
    }
}

impl ScoringStrategy for KeywordScorer {
    fn score(&self, article: &Article) -> f64 {
        let mut raw = self.points(&article.title);
        // A summary that merely repeats the title is not scored twice.
        if article.summary != article.title {
            raw += self.points(&article.summary);
        }
        raw * article.source_weight
    }
}

/// Scores articles and orders them by importance.
#[derive(Clone)]
pub struct Ranker {
    strategy: Arc<dyn ScoringStrategy>,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(Arc::new(KeywordScorer::default()))
    }
}

impl Ranker {
    pub fn new(strategy: Arc<dyn ScoringStrategy>) -> Self {
        Self { strategy }
    }

    /// Set every article's `importance_score` and sort descending. Ties keep
    /// their input order.
    #[instrument(level = "debug", skip_all, fields(count = articles.len()))]
    pub fn rank(&self, mut articles: Vec<Article>) -> Vec<Article> {
        for a in articles.iter_mut() {
            a.importance_score = self.strategy.score(a);
        }
        articles.sort_by(|a, b| b.importance_score.total_cmp(&a.importance_score));
        if let Some(top) = articles.first() {
            debug!(top_score = top.importance_score, top_title = %top.title, "Ranked articles");
        }
        articles
    }
}

impl std::fmt::Debug for Ranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ranker").finish_non_exhaustive()
    }
}

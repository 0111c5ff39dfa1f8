//! Data models shared by every pipeline stage.
//!
//! - [`Source`]: a configured site to scrape, with its editorial weight
//! - [`RawArticle`]: unvalidated scraper output, any field may be missing
//! - [`Article`]: a normalized, scorable article
//! - [`Digest`]: the bounded output of one pipeline run
//! - [`FormattedMessage`]: what a chat sink receives

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Editorial category of a source. Unknown categories survive a round trip
/// through [`Category::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Ai,
    Tech,
    MacTips,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Ai => "ai",
            Category::Tech => "tech",
            Category::MacTips => "mac_tips",
            Category::Other(s) => s,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ai" => Category::Ai,
            "tech" => Category::Tech,
            "mac_tips" => Category::MacTips,
            _ => Category::Other(s.trim().to_string()),
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Category::from(s.to_string())
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_weight() -> f64 {
    1.0
}

/// A content source: where to scrape, how to extract, and how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Unique key within the registry.
    pub name: String,
    /// Base url, http or https.
    pub url: String,
    pub category: Category,
    /// Multiplier applied to the keyword score of every article from this source.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Field name (`title`, `link`, `summary`, `content`, `time`) to CSS selector.
    #[serde(default, alias = "selectors")]
    pub extraction_hints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Unprocessed output of scraping one article from one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawArticle {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub publish_time: Option<String>,
    pub source_name: Option<String>,
}

/// Publication time of an article.
///
/// `Unknown` sorts before every known time so a newest-first sort puts
/// undated articles last. Known times keep the exact string the source gave.
#[derive(Debug, Clone)]
pub enum PublishTime {
    Unknown,
    Known {
        raw: String,
        at: DateTime<FixedOffset>,
    },
}

const UNKNOWN_SENTINEL: &str = "unknown";

impl PublishTime {
    /// Parse an ISO-8601 timestamp. Accepts RFC 3339, naive date-times
    /// (taken as UTC) and bare dates (midnight UTC). Anything else is `Unknown`.
    pub fn parse(input: &str) -> Self {
        let raw = input.trim();
        if raw.is_empty() {
            return PublishTime::Unknown;
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return PublishTime::Known {
                raw: raw.to_string(),
                at,
            };
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return PublishTime::Known {
                    raw: raw.to_string(),
                    at: naive.and_utc().fixed_offset(),
                };
            }
        }
        if let Some(naive) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return PublishTime::Known {
                raw: raw.to_string(),
                at: naive.and_utc().fixed_offset(),
            };
        }
        PublishTime::Unknown
    }

    pub fn is_known(&self) -> bool {
        matches!(self, PublishTime::Known { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            PublishTime::Unknown => UNKNOWN_SENTINEL,
            PublishTime::Known { raw, .. } => raw,
        }
    }
}

impl PartialEq for PublishTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PublishTime {}

impl PartialOrd for PublishTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublishTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PublishTime::Unknown, PublishTime::Unknown) => Ordering::Equal,
            (PublishTime::Unknown, PublishTime::Known { .. }) => Ordering::Less,
            (PublishTime::Known { .. }, PublishTime::Unknown) => Ordering::Greater,
            (PublishTime::Known { at: a, .. }, PublishTime::Known { at: b, .. }) => a.cmp(b),
        }
    }
}

impl fmt::Display for PublishTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PublishTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PublishTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PublishTime::parse(&s))
    }
}

/// A normalized article. `importance_score` is owned by the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub summary: String,
    /// Canonical url and dedup key. Empty when the source gave none.
    pub url: String,
    pub source: String,
    pub source_weight: f64,
    pub category: String,
    pub publish_time: PublishTime,
    pub importance_score: f64,
    pub crawl_time: DateTime<Utc>,
}

/// Final output of one run. Built once by the assembler, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    /// Local calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub title: String,
    pub summary: String,
    pub trend_list: Vec<String>,
    pub image_prompts: [String; 3],
    /// Top articles by importance, capped for display.
    pub articles: Vec<Article>,
    /// Number of articles handed to the summarizer.
    pub total_article_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Message handed to a chat sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormattedMessage {
    Text {
        content: String,
    },
    Rich {
        title: String,
        summary: String,
        bullets: Vec<String>,
    },
}

impl FormattedMessage {
    /// Plain-text rendering, used by sinks that only accept text.
    pub fn render_text(&self) -> String {
        match self {
            FormattedMessage::Text { content } => content.clone(),
            FormattedMessage::Rich {
                title,
                summary,
                bullets,
            } => {
                let mut out = format!("{title}\n\n{summary}\n");
                if !bullets.is_empty() {
                    out.push_str("\nToday's trends:\n");
                    for b in bullets {
                        out.push_str("• ");
                        out.push_str(b);
                        out.push('\n');
                    }
                }
                out
            }
        }
    }
}

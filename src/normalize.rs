//! Conversion of raw scraper output into canonical [`Article`]s.
//!
//! Normalization is a pure function of the raw record, its source and the
//! crawl time: the same inputs always produce the same article.

use crate::models::{Article, PublishTime, RawArticle, Source};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use url::Url;

/// Titles shorter than this are presumed to be navigation or UI fragments.
pub const DEFAULT_MIN_TITLE_CHARS: usize = 10;

/// Characters of content used as a summary when the source gave none.
const CONTENT_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    min_title_chars: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TITLE_CHARS)
    }
}

impl Normalizer {
    pub fn new(min_title_chars: usize) -> Self {
        Self { min_title_chars }
    }

    /// Turn one scraped record into an [`Article`].
    ///
    /// Whitespace in the title and summary is collapsed, the url is resolved
    /// against the source's base url, and the summary falls back to a content
    /// excerpt and then to the title. Category and weight always come from
    /// `source`, never from the raw record.
    ///
    /// # Arguments
    ///
    /// * `raw` - The record as the scraper produced it
    /// * `source` - The registry entry the record was scraped from
    /// * `crawl_time` - Timestamp stamped on the article, shared by a whole run
    ///
    /// # Returns
    ///
    /// `None` when the trimmed title is empty or shorter than
    /// `min_title_chars` characters, otherwise the normalized article with an
    /// importance score of 0.
    #[instrument(level = "trace", skip_all, fields(source = %source.name))]
    pub fn normalize(
        &self,
        raw: &RawArticle,
        source: &Source,
        crawl_time: DateTime<Utc>,
    ) -> Option<Article> {
        let title = collapse_whitespace(raw.title.as_deref().unwrap_or_default());
        let title_chars = title.chars().count();
        if title_chars == 0 || title_chars < self.min_title_chars {
            debug!(%title, title_chars, "Rejected raw article with short title");
            return None;
        }

        if let Some(claimed) = raw.source_name.as_deref() {
            if claimed != source.name {
                debug!(claimed, "Raw article claims a different source name");
            }
        }

        let summary = non_empty(raw.summary.as_deref())
            .or_else(|| non_empty(raw.content.as_deref()).map(excerpt))
            .unwrap_or_else(|| title.clone());

        let publish_time = raw
            .publish_time
            .as_deref()
            .map(PublishTime::parse)
            .unwrap_or(PublishTime::Unknown);

        Some(Article {
            url: resolve_url(raw.url.as_deref().unwrap_or_default(), &source.url),
            title,
            summary,
            source: source.name.clone(),
            source_weight: source.weight,
            category: source.category.as_str().to_string(),
            publish_time,
            importance_score: 0.0,
            crawl_time,
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(collapse_whitespace).filter(|s| !s.is_empty())
}

fn excerpt(content: String) -> String {
    if content.chars().count() <= CONTENT_EXCERPT_CHARS {
        content
    } else {
        content.chars().take(CONTENT_EXCERPT_CHARS).collect()
    }
}

/// Resolve `raw` against the source base url. Empty stays empty.
fn resolve_url(raw: &str, base: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Ok(absolute) = Url::parse(raw) {
        if absolute.has_host() {
            return absolute.to_string();
        }
    }
    match Url::parse(base.trim()) {
        Ok(base_url) => match base_url.join(raw) {
            Ok(joined) => joined.to_string(),
            Err(_) => format!("{}{}", origin(&base_url), ensure_leading_slash(raw)),
        },
        Err(_) => raw.to_string(),
    }
}

fn origin(base: &Url) -> String {
    match (base.host_str(), base.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", base.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", base.scheme(), host),
        _ => String::new(),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

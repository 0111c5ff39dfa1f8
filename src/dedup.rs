//! Cross-source deduplication by canonical url.

use crate::models::Article;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// What to do with articles that have no url and therefore no identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep every url-less article; none of them is a duplicate of another.
    #[default]
    KeepEmptyUrl,
    /// Drop url-less articles, they cannot be matched against later runs.
    DropEmptyUrl,
}

/// Remove later articles whose url was already seen. Stable, first occurrence wins.
pub fn dedupe(articles: Vec<Article>) -> Vec<Article> {
    dedupe_with(articles, DedupPolicy::KeepEmptyUrl)
}

pub fn dedupe_with(articles: Vec<Article>, policy: DedupPolicy) -> Vec<Article> {
    let before = articles.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(before);

    let unique: Vec<Article> = articles
        .into_iter()
        .filter(|a| {
            if a.url.is_empty() {
                policy == DedupPolicy::KeepEmptyUrl
            } else {
                seen.insert(a.url.clone())
            }
        })
        .collect();

    debug!(
        before,
        after = unique.len(),
        dropped = before - unique.len(),
        "Deduplicated articles"
    );
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublishTime;
    use chrono::Utc;
    use proptest::prelude::*;

    fn article(url: &str, source: &str) -> Article {
        Article {
            title: format!("Story at {url} from {source}"),
            summary: String::new(),
            url: url.to_string(),
            source: source.to_string(),
            source_weight: 1.0,
            category: "ai".to_string(),
            publish_time: PublishTime::Unknown,
            importance_score: 0.0,
            crawl_time: Utc::now(),
        }
    }

    #[test]
    fn test_first_occurrence_wins() {
        let out = dedupe(vec![
            article("https://x.com/a", "A"),
            article("https://x.com/b", "A"),
            article("https://x.com/a", "B"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source, "A");
        assert_eq!(out[0].url, "https://x.com/a");
        assert_eq!(out[1].url, "https://x.com/b");
    }

    #[test]
    fn test_exact_match_only() {
        let out = dedupe(vec![
            article("https://x.com/a", "A"),
            article("https://x.com/a/", "A"),
            article("https://x.com/a?ref=rss", "A"),
        ]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_empty_urls_are_never_duplicates() {
        let out = dedupe(vec![article("", "A"), article("", "B"), article("", "A")]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_drop_empty_url_policy() {
        let out = dedupe_with(
            vec![article("", "A"), article("https://x.com/a", "B")],
            DedupPolicy::DropEmptyUrl,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, "B");
    }

    fn urls() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(
            prop_oneof![
                Just(String::new()),
                "https://x\\.com/[a-d]",
            ],
            0..40,
        )
    }

    proptest! {
        #[test]
        fn prop_non_empty_urls_are_unique(urls in urls()) {
            let input: Vec<Article> = urls.iter().map(|u| article(u, "S")).collect();
            let out = dedupe(input);
            let mut seen = HashSet::new();
            for a in out.iter().filter(|a| !a.url.is_empty()) {
                prop_assert!(seen.insert(a.url.clone()));
            }
        }

        #[test]
        fn prop_dedupe_is_idempotent(urls in urls()) {
            let input: Vec<Article> = urls.iter().map(|u| article(u, "S")).collect();
            let once = dedupe(input);
            let twice = dedupe(once.clone());
            prop_assert_eq!(once.len(), twice.len());
        }

        #[test]
        fn prop_dedupe_preserves_relative_order(urls in urls()) {
            let input: Vec<Article> = urls
                .iter()
                .enumerate()
                .map(|(i, u)| article(u, &i.to_string()))
                .collect();
            let positions: Vec<usize> = dedupe(input)
                .iter()
                .map(|a| a.source.parse().unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

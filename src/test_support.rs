//! Shared fixtures for unit tests.

use crate::error::{ScrapeError, SummarizationError};
use crate::llm::{SummaryOutput, Summarizer};
use crate::models::{Article, Category, PublishTime, RawArticle, Source};
use crate::scrapers::Scraper;
use async_trait::async_trait;
use axum::Router;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Returns one article per source after `delay`.
#[derive(Debug, Default)]
pub struct StaticScraper {
    pub delay: Duration,
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn scrape(&self, source: &Source) -> Result<Vec<RawArticle>, ScrapeError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![RawArticle {
            title: Some(format!("Headline from {}", source.name)),
            url: Some(format!("{}story", source.url)),
            ..Default::default()
        }])
    }
}

/// A summarizer whose every field fails.
#[derive(Debug, Default)]
pub struct OfflineSummarizer;

#[async_trait]
impl Summarizer for OfflineSummarizer {
    async fn summarize(&self, _articles_text: &str) -> SummaryOutput {
        SummaryOutput::failed(|| SummarizationError::NotConfigured("offline".to_string()))
    }
}

/// Serve `router` on an ephemeral local port and return its base url.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn source(name: &str, category: Category, weight: f64) -> Source {
    Source {
        name: name.to_string(),
        url: format!("https://{}.example.com/", name.to_lowercase()),
        category,
        weight,
        extraction_hints: BTreeMap::new(),
        description: None,
    }
}

pub fn article(title: &str, url: &str, source: &str) -> Article {
    Article {
        title: title.to_string(),
        summary: format!("Summary of {title}"),
        url: url.to_string(),
        source: source.to_string(),
        source_weight: 1.0,
        category: "ai".to_string(),
        publish_time: PublishTime::Unknown,
        importance_score: 0.0,
        crawl_time: Utc.with_ymd_and_hms(2025, 5, 6, 0, 0, 0).unwrap(),
    }
}

//! Selector-based HTML scraper.
//!
//! Fetches the source's landing page and extracts one [`RawArticle`] per
//! element matching the `title` hint. Links are taken from an anchor inside
//! (or being) the title element, else from the n-th `link` match; summary,
//! content and time come from the n-th match of their hints.

use super::Scraper;
use crate::error::ScrapeError;
use crate::models::{RawArticle, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_TITLE_HINT: &str = "article h2, article h3, .article-title, .post-title";

static ANCHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static anchor selector"));

#[derive(Debug, Clone)]
pub struct HtmlScraper {
    client: Client,
}

impl HtmlScraper {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Scraper for HtmlScraper {
    #[instrument(level = "info", skip_all, fields(source = %source.name, url = %source.url))]
    async fn scrape(&self, source: &Source) -> Result<Vec<RawArticle>, ScrapeError> {
        let response = self.client.get(&source.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: source.url.clone(),
            });
        }
        let body = response.text().await?;
        debug!(bytes = body.len(), "Fetched landing page");

        let articles = extract(&body, source)?;
        if articles.is_empty() {
            return Err(ScrapeError::Empty);
        }
        info!(count = articles.len(), "Extracted raw articles");
        Ok(articles)
    }
}

fn selector(field: &str, css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|_| ScrapeError::Selector {
        field: field.to_string(),
        selector: css.to_string(),
    })
}

fn hint_selector(source: &Source, field: &str) -> Result<Option<Selector>, ScrapeError> {
    source
        .extraction_hints
        .get(field)
        .filter(|css| !css.trim().is_empty())
        .map(|css| selector(field, css))
        .transpose()
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn nth_text(document: &Html, sel: Option<&Selector>, n: usize) -> Option<String> {
    sel.and_then(|s| document.select(s).nth(n))
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn href_of(el: ElementRef<'_>) -> Option<String> {
    if el.value().name() == "a" {
        if let Some(href) = el.value().attr("href") {
            return Some(href.to_string());
        }
    }
    el.select(&ANCHOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Link of a title that has no anchor of its own: the first `link` match in
/// the smallest enclosing element that holds no other title. Gives up once
/// an ancestor spans several titles, since any link there may belong to a
/// neighbouring story.
fn item_link(title: ElementRef<'_>, title_sel: &Selector, link_sel: &Selector) -> Option<String> {
    for node in title.ancestors() {
        let Some(scope) = ElementRef::wrap(node) else {
            continue;
        };
        if scope.select(title_sel).nth(1).is_some() {
            return None;
        }
        if let Some(href) = scope.select(link_sel).find_map(href_of) {
            return Some(href);
        }
    }
    None
}

/// Pull raw articles out of a landing page using the source's hints.
pub fn extract(html: &str, source: &Source) -> Result<Vec<RawArticle>, ScrapeError> {
    let title_sel = match hint_selector(source, "title")? {
        Some(sel) => sel,
        None => selector("title", DEFAULT_TITLE_HINT)?,
    };
    let link_sel = hint_selector(source, "link")?;
    let summary_sel = hint_selector(source, "summary")?;
    let content_sel = hint_selector(source, "content")?;
    let time_sel = hint_selector(source, "time")?;

    let document = Html::parse_document(html);

    let articles = document
        .select(&title_sel)
        .enumerate()
        .map(|(i, el)| {
            let publish_time = time_sel.as_ref().and_then(|s| {
                document.select(s).nth(i).and_then(|t| {
                    t.value()
                        .attr("datetime")
                        .map(str::to_string)
                        .or_else(|| Some(text_of(t)))
                })
            });
            RawArticle {
                title: Some(text_of(el)),
                summary: nth_text(&document, summary_sel.as_ref(), i),
                content: nth_text(&document, content_sel.as_ref(), i),
                url: href_of(el)
                    .or_else(|| link_sel.as_ref().and_then(|l| item_link(el, &title_sel, l))),
                publish_time,
                source_name: Some(source.name.clone()),
            }
        })
        .collect();
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use std::collections::BTreeMap;

    const PAGE: &str = r#"
        <html><body>
          <div class="item">
            <h2 class="article-title"><a href="/2025/05/agents.html">Agents get a memory upgrade</a></h2>
            <p class="article-summary">Long-term memory lands in the SDK.</p>
            <time datetime="2025-05-06T08:00:00+08:00">May 6</time>
          </div>
          <div class="item">
            <h2 class="article-title">Chipmaker unveils new accelerator</h2>
            <p class="article-summary">Twice the throughput.</p>
            <time>yesterday</time>
          </div>
          <a class="more" href="https://other.example.com/chips">more</a>
        </body></html>
    "#;

    fn source(hints: &[(&str, &str)]) -> Source {
        Source {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            category: Category::Tech,
            weight: 1.0,
            extraction_hints: hints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            description: None,
        }
    }

    #[test]
    fn test_extract_with_hints() {
        let s = source(&[
            ("title", ".article-title"),
            ("link", ".more"),
            ("summary", ".article-summary"),
            ("time", "time"),
        ]);
        let articles = extract(PAGE, &s).unwrap();
        assert_eq!(articles.len(), 2);

        assert_eq!(articles[0].title.as_deref(), Some("Agents get a memory upgrade"));
        assert_eq!(articles[0].url.as_deref(), Some("/2025/05/agents.html"));
        assert_eq!(
            articles[0].summary.as_deref(),
            Some("Long-term memory lands in the SDK.")
        );
        assert_eq!(
            articles[0].publish_time.as_deref(),
            Some("2025-05-06T08:00:00+08:00")
        );
        assert_eq!(articles[0].source_name.as_deref(), Some("Example"));

        // no anchor in the title or its item; the page-level link is not borrowed
        assert_eq!(articles[1].url, None);
        assert_eq!(articles[1].publish_time.as_deref(), Some("yesterday"));
    }

    const LIST_PAGE: &str = r#"
        <html><body><ul>
          <li><h2 class="t"><a href="/a">First headline with an anchor</a></h2></li>
          <li><h2 class="t">Second headline without any anchor</h2></li>
          <li><h2 class="t"><a href="/c">Third headline with an anchor</a></h2></li>
          <li><h2 class="t">Fourth headline with a link below</h2><a class="read" href="/d">Read</a></li>
        </ul></body></html>
    "#;

    #[test]
    fn test_link_hint_stays_inside_the_item() {
        let s = source(&[("title", ".t"), ("link", ".t a, .read")]);
        let articles = extract(LIST_PAGE, &s).unwrap();
        let urls: Vec<Option<&str>> = articles.iter().map(|a| a.url.as_deref()).collect();
        assert_eq!(urls, vec![Some("/a"), None, Some("/c"), Some("/d")]);
    }

    #[test]
    fn test_anchorless_title_does_not_shadow_a_later_story() {
        let s = source(&[("title", ".t"), ("link", ".t a")]);
        let raws = extract(LIST_PAGE, &s).unwrap();
        let normalizer = crate::normalize::Normalizer::new(10);
        let articles: Vec<_> = raws
            .iter()
            .filter_map(|r| normalizer.normalize(r, &s, chrono::Utc::now()))
            .collect();
        let kept = crate::dedup::dedupe(articles);
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().any(|a| a.url == "https://example.com/c"));
    }

    #[test]
    fn test_default_title_hint() {
        let articles = extract(PAGE, &source(&[])).unwrap();
        assert_eq!(articles.len(), 2);
        assert!(articles.iter().all(|a| a.summary.is_none()));
    }

    #[test]
    fn test_invalid_selector_is_an_error() {
        let err = extract(PAGE, &source(&[("title", "h2[")])).unwrap_err();
        assert!(matches!(err, ScrapeError::Selector { ref field, .. } if field == "title"));
    }

    #[test]
    fn test_no_matches_yields_empty() {
        let articles = extract("<html><body><p>nothing</p></body></html>", &source(&[])).unwrap();
        assert!(articles.is_empty());
    }

    async fn scrape_local(path: &str, body: &'static str) -> Result<Vec<RawArticle>, ScrapeError> {
        use axum::http::StatusCode;
        use axum::response::Html as HtmlBody;
        use axum::routing::get;

        let app = axum::Router::new()
            .route("/news", get(move || async move { HtmlBody(body) }))
            .route("/gone", get(|| async { StatusCode::GONE }));
        let base = crate::test_support::serve(app).await;
        let mut s = source(&[("title", ".article-title")]);
        s.url = format!("{base}{path}");
        HtmlScraper::new("test-agent", Duration::from_secs(5))
            .unwrap()
            .scrape(&s)
            .await
    }

    #[tokio::test]
    async fn test_scrape_fetches_and_extracts() {
        let articles = scrape_local("/news", PAGE).await.unwrap();
        assert_eq!(articles.len(), 2);
    }

    #[tokio::test]
    async fn test_scrape_error_status() {
        let err = scrape_local("/gone", PAGE).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 410, .. }));
    }

    #[tokio::test]
    async fn test_scrape_page_without_articles_is_empty_error() {
        let err = scrape_local("/news", "<html><body></body></html>").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Empty));
    }
}

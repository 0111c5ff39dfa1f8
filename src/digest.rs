//! Digest assembly and the shapes a digest is delivered in.
//!
//! The assembler never fails: every field the summarizer could not produce
//! takes a fixed fallback, so a digest always has a summary, at least one
//! trend and exactly three image prompts.

use crate::models::{Article, Digest, FormattedMessage};
use crate::sinks::Record;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Articles embedded in a digest.
pub const DEFAULT_DISPLAY_ARTICLES: usize = 10;

/// Trend bullets in a chat message.
pub const MESSAGE_BULLETS: usize = 5;

pub const FALLBACK_SUMMARY: &str = "Summary unavailable; see the article list.";

pub const FALLBACK_TRENDS: [&str; 2] = [
    "AI technology continues to advance rapidly",
    "AI adoption keeps deepening across industries",
];

pub const FALLBACK_IMAGE_PROMPTS: [&str; 3] = [
    "A futuristic AI technology scene in a clean, modern design style",
    "Humans and artificial intelligence working side by side, high-tech atmosphere",
    "A digital world where AI powers everyday life",
];

#[derive(Debug, Clone, Copy)]
pub struct DigestAssembler {
    display_articles: usize,
}

impl Default for DigestAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_ARTICLES)
    }
}

impl DigestAssembler {
    pub fn new(display_articles: usize) -> Self {
        Self { display_articles }
    }

    /// Build the digest. `None` or empty summarizer fields take their fallback;
    /// image prompts are padded or cut to exactly three. The date is the
    /// calendar date of `now` in its own time zone.
    pub fn assemble<Tz: TimeZone>(
        &self,
        summary: Option<String>,
        trends: Option<Vec<String>>,
        image_prompts: Option<Vec<String>>,
        mut ranked: Vec<Article>,
        total_article_count: usize,
        now: DateTime<Tz>,
    ) -> Digest {
        let summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                warn!("Using fallback summary");
                FALLBACK_SUMMARY.to_string()
            });

        let trend_list = trends.filter(|t| !t.is_empty()).unwrap_or_else(|| {
            warn!("Using fallback trends");
            FALLBACK_TRENDS.iter().map(|t| t.to_string()).collect()
        });

        let mut prompts = image_prompts.unwrap_or_default().into_iter();
        let image_prompts: [String; 3] = std::array::from_fn(|i| {
            prompts
                .next()
                .unwrap_or_else(|| FALLBACK_IMAGE_PROMPTS[i].to_string())
        });

        ranked.truncate(self.display_articles);
        let date = now.date_naive().format("%Y-%m-%d").to_string();
        let digest = Digest {
            title: format!("AI Tech Daily - {date}"),
            date,
            summary,
            trend_list,
            image_prompts,
            articles: ranked,
            total_article_count,
            created_at: now.with_timezone(&Utc),
        };
        info!(
            date = %digest.date,
            articles = digest.articles.len(),
            total = digest.total_article_count,
            trends = digest.trend_list.len(),
            "Assembled digest"
        );
        digest
    }
}

/// Names of the record fields a digest is flattened into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFields {
    pub date: String,
    /// Receives the whole digest serialized as JSON.
    pub raw_content: String,
    /// Receives the digest summary.
    pub processed_content: String,
    pub image_prompts: [String; 3],
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            raw_content: "raw_content".to_string(),
            processed_content: "processed_content".to_string(),
            image_prompts: std::array::from_fn(|i| format!("image_prompt_{}", i + 1)),
        }
    }
}

/// Flatten a digest into a record for spreadsheet-like backends.
pub fn digest_to_record(digest: &Digest, fields: &RecordFields) -> Result<Record, serde_json::Error> {
    let mut record = Record::new();
    record.insert(fields.date.clone(), Value::String(digest.date.clone()));
    record.insert(
        fields.raw_content.clone(),
        Value::String(serde_json::to_string(digest)?),
    );
    record.insert(
        fields.processed_content.clone(),
        Value::String(digest.summary.clone()),
    );
    for (name, prompt) in fields.image_prompts.iter().zip(&digest.image_prompts) {
        record.insert(name.clone(), Value::String(prompt.clone()));
    }
    Ok(record)
}

/// Chat message announcing a digest.
pub fn group_message(digest: &Digest) -> FormattedMessage {
    FormattedMessage::Rich {
        title: digest.title.clone(),
        summary: digest.summary.clone(),
        bullets: digest
            .trend_list
            .iter()
            .take(MESSAGE_BULLETS)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::article;
    use chrono::FixedOffset;

    fn now() -> DateTime<FixedOffset> {
        // 23:30 UTC is already the next day in UTC+8
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 7, 7, 30, 0)
            .unwrap()
    }

    fn articles(n: usize) -> Vec<Article> {
        (0..n)
            .map(|i| article(&format!("Story number {i}"), &format!("https://x.com/{i}"), "S"))
            .collect()
    }

    fn prompts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("prompt {i}")).collect()
    }

    #[test]
    fn test_always_three_image_prompts() {
        let a = DigestAssembler::default();
        for n in [0, 1, 2, 3, 5] {
            let d = a.assemble(None, None, Some(prompts(n)), vec![], 0, now());
            assert_eq!(d.image_prompts.len(), 3);
            assert!(d.image_prompts.iter().all(|p| !p.is_empty()));
        }
    }

    #[test]
    fn test_short_prompt_list_padded_with_fallbacks() {
        let d = DigestAssembler::default().assemble(None, None, Some(prompts(1)), vec![], 0, now());
        assert_eq!(d.image_prompts[0], "prompt 0");
        assert_eq!(d.image_prompts[1], FALLBACK_IMAGE_PROMPTS[1]);
        assert_eq!(d.image_prompts[2], FALLBACK_IMAGE_PROMPTS[2]);
    }

    #[test]
    fn test_long_prompt_list_truncated() {
        let d = DigestAssembler::default().assemble(None, None, Some(prompts(5)), vec![], 0, now());
        assert_eq!(d.image_prompts, ["prompt 0", "prompt 1", "prompt 2"].map(String::from));
    }

    #[test]
    fn test_fallbacks_when_summarizer_failed() {
        let d = DigestAssembler::default().assemble(None, None, None, articles(3), 3, now());
        assert_eq!(d.summary, FALLBACK_SUMMARY);
        assert_eq!(d.trend_list, FALLBACK_TRENDS.map(String::from).to_vec());
        assert_eq!(d.image_prompts, FALLBACK_IMAGE_PROMPTS.map(String::from));
    }

    #[test]
    fn test_blank_summary_and_empty_trends_use_fallbacks() {
        let d = DigestAssembler::default().assemble(
            Some("   ".to_string()),
            Some(vec![]),
            None,
            vec![],
            0,
            now(),
        );
        assert_eq!(d.summary, FALLBACK_SUMMARY);
        assert_eq!(d.trend_list.len(), 2);
    }

    #[test]
    fn test_articles_capped_and_total_kept() {
        let d = DigestAssembler::default().assemble(None, None, None, articles(30), 30, now());
        assert_eq!(d.articles.len(), DEFAULT_DISPLAY_ARTICLES);
        assert_eq!(d.articles[0].title, "Story number 0");
        assert_eq!(d.total_article_count, 30);
    }

    #[test]
    fn test_date_is_local_to_now() {
        let d = DigestAssembler::default().assemble(None, None, None, vec![], 0, now());
        assert_eq!(d.date, "2025-05-07");
        assert_eq!(d.title, "AI Tech Daily - 2025-05-07");
        assert_eq!(d.created_at.to_rfc3339(), "2025-05-06T23:30:00+00:00");
    }

    #[test]
    fn test_record_uses_configured_field_names() {
        let d = DigestAssembler::default().assemble(
            Some("Big day".to_string()),
            None,
            None,
            articles(2),
            2,
            now(),
        );
        let record = digest_to_record(&d, &RecordFields::default()).unwrap();
        assert_eq!(record["date"], "2025-05-07");
        assert_eq!(record["processed_content"], "Big day");
        assert_eq!(record["image_prompt_3"], FALLBACK_IMAGE_PROMPTS[2]);
        let blob: Digest = serde_json::from_str(record["raw_content"].as_str().unwrap()).unwrap();
        assert_eq!(blob.articles.len(), 2);

        let custom = RecordFields {
            date: "日期".to_string(),
            ..Default::default()
        };
        let record = digest_to_record(&d, &custom).unwrap();
        assert!(record.contains_key("日期"));
        assert!(!record.contains_key("date"));
        assert_eq!(record.len(), 6);
    }

    #[test]
    fn test_group_message_caps_bullets() {
        let trends: Vec<String> = (0..8).map(|i| format!("trend {i}")).collect();
        let d = DigestAssembler::default().assemble(None, Some(trends), None, vec![], 0, now());
        match group_message(&d) {
            FormattedMessage::Rich { title, bullets, .. } => {
                assert_eq!(title, d.title);
                assert_eq!(bullets.len(), MESSAGE_BULLETS);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}

//! LLM summarization of a day's articles.
//!
//! The pipeline only sees the [`Summarizer`] trait. [`OpenAiSummarizer`]
//! talks to any OpenAI-compatible `/chat/completions` endpoint and asks three
//! independent questions (digest summary, trends, image prompts) in parallel.
//! Each answer succeeds or fails on its own, so one bad completion never
//! costs the other two fields.

use crate::error::SummarizationError;
use crate::models::Article;
use crate::retry::RetryPolicy;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Number of ranked articles shown to the model.
pub const LLM_ARTICLE_LIMIT: usize = 20;

/// Per-field outcome of one summarization call.
#[derive(Debug)]
pub struct SummaryOutput {
    pub summary: Result<String, SummarizationError>,
    pub trends: Result<Vec<String>, SummarizationError>,
    pub image_prompts: Result<Vec<String>, SummarizationError>,
}

impl SummaryOutput {
    /// Every field failed for the same reason.
    pub fn failed(make: impl Fn() -> SummarizationError) -> Self {
        Self {
            summary: Err(make()),
            trends: Err(make()),
            image_prompts: Err(make()),
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the formatted article list. Never fails as a whole.
    async fn summarize(&self, articles_text: &str) -> SummaryOutput;
}

/// Render the top [`LLM_ARTICLE_LIMIT`] articles as a numbered plain-text list.
pub fn format_articles_for_llm(articles: &[Article]) -> String {
    articles
        .iter()
        .take(LLM_ARTICLE_LIMIT)
        .enumerate()
        .map(|(i, a)| {
            format!(
                "Article {}:\nTitle: {}\nSource: {}\nPublished: {}\nSummary: {}\nLink: {}\n",
                i + 1,
                a.title,
                a.source,
                a.publish_time,
                a.summary,
                if a.url.is_empty() { "N/A" } else { a.url.as_str() },
            )
        })
        .join("\n")
}

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•·]+|\d+\s*[.)、:]|[(（]\d+[)）])\s*").expect("static list marker regex")
});

/// Split a list-shaped completion into items: one per non-empty line, list
/// markers stripped, duplicates dropped.
pub fn split_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|item| !item.is_empty())
        .unique()
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base of the OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Token cap for the summary answer; the list answers use less.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

struct Task {
    name: &'static str,
    system: &'static str,
    instruction: &'static str,
    max_tokens_divisor: u32,
    temperature_bump: f32,
}

const SUMMARY_TASK: Task = Task {
    name: "summary",
    system: "You are the editor of a daily AI and technology briefing. You turn \
             dense technical news into a short, readable morning digest.",
    instruction: "Write a concise digest of the news below.\n\
                  1. Lead with the 3-5 most important stories, most important first.\n\
                  2. One or two sentences per story.\n\
                  3. Keep it under 300 words and easy to skim.\n\
                  Answer in the language most of the articles are written in.",
    max_tokens_divisor: 1,
    temperature_bump: 0.0,
};

const TRENDS_TASK: Task = Task {
    name: "trends",
    system: "You are an industry analyst who identifies where AI technology is heading.",
    instruction: "Based on the news below, name 3-5 current trends in AI.\n\
                  Write exactly one trend per line, one sentence each, no preamble.",
    max_tokens_divisor: 2,
    temperature_bump: 0.0,
};

const IMAGE_TASK: Task = Task {
    name: "image_prompts",
    system: "You are a visual designer who writes prompts for illustrating technology news.",
    instruction: "Based on the news below, write 3 image-generation prompts for the \
                  digest's illustrations.\n\
                  Each prompt describes one scene with AI, technology or future elements, \
                  in a clean modern style, under 50 words.\n\
                  Write exactly one prompt per line, no preamble.",
    max_tokens_divisor: 2,
    temperature_bump: 0.1,
};

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Summarizer backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
    client: Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl OpenAiSummarizer {
    pub fn new(
        config: LlmConfig,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, SummarizationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    #[instrument(level = "info", skip_all, fields(task = task.name))]
    async fn complete(&self, task: &Task, articles_text: &str) -> Result<String, SummarizationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SummarizationError::NotConfigured("no API key".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": task.system},
                {"role": "user", "content": format!("{}\n\nNews:\n{}", task.instruction, articles_text)},
            ],
            "max_tokens": (self.config.max_tokens / task.max_tokens_divisor).max(1),
            "temperature": self.config.temperature + task.temperature_bump,
        });
        let url = self.endpoint();

        let t0 = Instant::now();
        let res = self
            .retry
            .run(task.name, || self.post(&url, api_key, &body))
            .await;
        match &res {
            Ok(text) => info!(
                elapsed_ms_total = t0.elapsed().as_millis() as u64,
                chars = text.chars().count(),
                "Completion received"
            ),
            Err(e) => warn!(
                elapsed_ms_total = t0.elapsed().as_millis() as u64,
                error = %e,
                "Completion failed"
            ),
        }
        res
    }

    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<String, SummarizationError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SummarizationError::Status(status.as_u16()));
        }
        let raw = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&raw).map_err(|e| {
            debug!(response_preview = %truncate_for_log(&raw, 300), "Unparseable completion body");
            SummarizationError::Unparseable(e.to_string())
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SummarizationError::Unparseable("empty completion".to_string()))
    }

    async fn complete_list(
        &self,
        task: &Task,
        articles_text: &str,
    ) -> Result<Vec<String>, SummarizationError> {
        let text = self.complete(task, articles_text).await?;
        let items = split_list(&text);
        if items.is_empty() {
            return Err(SummarizationError::Unparseable(format!(
                "no list items in {} answer",
                task.name
            )));
        }
        Ok(items)
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn summarize(&self, articles_text: &str) -> SummaryOutput {
        let (summary, trends, image_prompts) = tokio::join!(
            self.complete(&SUMMARY_TASK, articles_text),
            self.complete_list(&TRENDS_TASK, articles_text),
            self.complete_list(&IMAGE_TASK, articles_text),
        );
        SummaryOutput {
            summary,
            trends,
            image_prompts,
        }
    }
}

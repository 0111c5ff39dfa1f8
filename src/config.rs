//! Application configuration.
//!
//! Built once at startup and passed down by reference. Sources, in
//! increasing precedence:
//!
//! 1. built-in defaults
//! 2. the YAML file given with `--config`
//! 3. environment variables (API keys and integration endpoints)
//! 4. command-line flags
//!
//! [`AppConfig::validate`] reports every problem at once instead of stopping
//! at the first.

use crate::dedup::DedupPolicy;
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::models::Source;
use crate::rank::{KeywordScorer, KeywordTiers};
use crate::registry::{SourceRegistry, check_url};
use crate::retry::RetryPolicy;
use crate::sinks::bitable::BitableConfig;
use crate::sinks::webhook::WebhookConfig;
use crate::utils::split_csv;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ranked articles kept for summarization.
    pub max_articles: usize,
    /// Ranked articles embedded in the digest.
    pub display_articles: usize,
    pub min_title_chars: usize,
    pub scrape_concurrency: usize,
    pub scrape_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub sink_timeout_secs: u64,
    pub dedup_policy: DedupPolicy,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_articles: 50,
            display_articles: 10,
            min_title_chars: 10,
            scrape_concurrency: 4,
            scrape_timeout_secs: 60,
            llm_timeout_secs: 120,
            sink_timeout_secs: 30,
            dedup_policy: DedupPolicy::default(),
            user_agent: concat!("ai_news_digest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

/// Retry policy per collaborator boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub scraper: RetryPolicy,
    pub llm: RetryPolicy,
    pub sinks: RetryPolicy,
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            scraper: RetryPolicy::none(),
            llm: RetryPolicy::none(),
            sinks: RetryPolicy::none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily run, `HH:MM`.
    pub daily_at: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: "08:00".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn time(&self) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    /// Keyword tier overrides for the importance ranker.
    pub ranking: KeywordTiers,
    pub llm: LlmConfig,
    pub bitable: Option<BitableConfig>,
    pub webhook: Option<WebhookConfig>,
    pub archive_dir: Option<PathBuf>,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
    pub retry: RetryConfig,
    /// Source catalog. The built-in catalog is used when absent.
    pub sources: Option<Vec<Source>>,
}

impl AppConfig {
    /// Defaults, overlaid with the YAML file at `path` if given.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }

        let (app_id, app_secret, app_token, table_id) = (
            get("FEISHU_APP_ID"),
            get("FEISHU_APP_SECRET"),
            get("FEISHU_APP_TOKEN"),
            get("FEISHU_TABLE_ID"),
        );
        if let Some(b) = self.bitable.as_mut() {
            for (slot, value) in [
                (&mut b.app_id, app_id),
                (&mut b.app_secret, app_secret),
                (&mut b.app_token, app_token),
                (&mut b.table_id, table_id),
            ] {
                if let Some(v) = value {
                    *slot = v;
                }
            }
        } else if let (Some(app_id), Some(app_secret), Some(app_token), Some(table_id)) =
            (app_id, app_secret, app_token, table_id)
        {
            self.bitable = Some(BitableConfig {
                base_url: "https://open.feishu.cn/open-apis".to_string(),
                app_id,
                app_secret,
                app_token,
                table_id,
                fields: Default::default(),
            });
        }
        if let (Some(b), Some(v)) = (self.bitable.as_mut(), get("FEISHU_BASE_URL")) {
            b.base_url = v;
        }

        if let Some(url) = get("IPAD_WEBHOOK_URL") {
            self.webhook.get_or_insert_with(WebhookConfig::default).url = url;
        }
        if let Some(webhook) = self.webhook.as_mut() {
            if let Some(groups) = get("TARGET_GROUPS") {
                webhook.targets = split_csv(&groups);
            }
            if webhook.targets.is_empty() {
                if let Some(group) = get("DEFAULT_GROUP_NAME") {
                    webhook.targets.push(group.trim().to_string());
                }
            }
        }

        if let Some(dir) = get("ARCHIVE_DIR") {
            self.archive_dir = Some(PathBuf::from(dir));
        }
    }

    /// The configured catalog, or the built-in one.
    pub fn registry(&self) -> SourceRegistry {
        match &self.sources {
            Some(sources) => SourceRegistry::from_sources(sources.clone()),
            None => SourceRegistry::with_defaults(),
        }
    }

    /// Check the whole configuration and report every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let p = &self.pipeline;

        for (name, value) in [
            ("pipeline.max_articles", p.max_articles),
            ("pipeline.display_articles", p.display_articles),
            ("pipeline.scrape_concurrency", p.scrape_concurrency),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be at least 1"));
            }
        }
        for (name, value) in [
            ("pipeline.scrape_timeout_secs", p.scrape_timeout_secs),
            ("pipeline.llm_timeout_secs", p.llm_timeout_secs),
            ("pipeline.sink_timeout_secs", p.sink_timeout_secs),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be at least 1"));
            }
        }

        if let Err(e) = KeywordScorer::from_tiers(&self.ranking) {
            problems.push(format!("ranking: {e}"));
        }
        if let Err(e) = check_url(&self.llm.base_url) {
            problems.push(format!("llm.base_url: {e}"));
        }
        if self.schedule.time().is_err() {
            problems.push(format!(
                "schedule.daily_at `{}` is not a HH:MM time",
                self.schedule.daily_at
            ));
        }

        if let Some(b) = &self.bitable {
            if let Err(e) = check_url(&b.base_url) {
                problems.push(format!("bitable.base_url: {e}"));
            }
            for (name, value) in [
                ("bitable.app_id", &b.app_id),
                ("bitable.app_secret", &b.app_secret),
                ("bitable.app_token", &b.app_token),
                ("bitable.table_id", &b.table_id),
            ] {
                if value.trim().is_empty() {
                    problems.push(format!("{name} is empty"));
                }
            }
        }
        if let Some(w) = &self.webhook {
            if let Err(e) = check_url(&w.url) {
                problems.push(format!("webhook.url: {e}"));
            }
            if w.targets.is_empty() {
                problems.push("webhook.targets is empty".to_string());
            }
        }

        if let Some(sources) = &self.sources {
            let registry = SourceRegistry::from_sources(sources.clone());
            problems.extend(registry.validate_all());
            let mut names = HashSet::new();
            for s in sources {
                if !names.insert(s.name.as_str()) {
                    problems.push(format!("source {} is listed more than once", s.name));
                }
                if !(s.weight.is_finite() && s.weight >= 0.0) {
                    problems.push(format!("source {} has invalid weight {}", s.name, s.weight));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let c = AppConfig::default();
        assert_eq!(c.pipeline.max_articles, 50);
        assert_eq!(c.pipeline.scrape_concurrency, 4);
        assert_eq!(c.server.port, 8000);
        assert_eq!(c.schedule.daily_at, "08:00");
        assert!(c.validate().is_ok());
        assert!(!c.registry().is_empty());
    }

    #[test]
    fn test_yaml_overrides_only_given_fields() {
        let yaml = r#"
pipeline:
  max_articles: 30
  dedup_policy: drop_empty_url
server:
  port: 9000
retry:
  llm:
    max_retries: 5
sources:
  - name: Example
    url: https://example.com
    category: tech
    weight: 1.2
    selectors:
      title: h2
"#;
        let c = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(c.pipeline.max_articles, 30);
        assert_eq!(c.pipeline.min_title_chars, 10);
        assert_eq!(c.pipeline.dedup_policy, DedupPolicy::DropEmptyUrl);
        assert_eq!(c.server.port, 9000);
        assert_eq!(c.server.host, "0.0.0.0");
        assert_eq!(c.retry.llm.max_retries, 5);
        assert_eq!(c.retry.scraper, RetryPolicy::default());
        assert_eq!(c.registry().len(), 1);
        assert_eq!(c.registry().list()[0].extraction_hints["title"], "h2");
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        let c = AppConfig::from_yaml("  \n").unwrap();
        assert_eq!(c.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::from_file(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "schedule:\n  daily_at: \"07:15\"\n").unwrap();
        let c = AppConfig::from_file(Some(&path)).unwrap();
        assert_eq!(c.schedule.time().unwrap(), NaiveTime::from_hms_opt(7, 15, 0).unwrap());
    }

    #[test]
    fn test_env_builds_integrations() {
        let mut c = AppConfig::default();
        c.apply_env_from(env(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("FEISHU_APP_ID", "cli_a"),
            ("FEISHU_APP_SECRET", "s"),
            ("FEISHU_APP_TOKEN", "bascn"),
            ("FEISHU_TABLE_ID", "tbl"),
            ("IPAD_WEBHOOK_URL", "http://localhost:8080/webhook"),
            ("DEFAULT_GROUP_NAME", "AI News"),
        ]));
        assert_eq!(c.llm.api_key.as_deref(), Some("sk-1"));
        assert_eq!(c.bitable.as_ref().unwrap().table_id, "tbl");
        let w = c.webhook.as_ref().unwrap();
        assert_eq!(w.url, "http://localhost:8080/webhook");
        assert_eq!(w.targets, vec!["AI News"]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_feishu_env_does_not_create_bitable() {
        let mut c = AppConfig::default();
        c.apply_env_from(env(&[("FEISHU_APP_ID", "cli_a")]));
        assert!(c.bitable.is_none());
    }

    #[test]
    fn test_target_groups_beat_default_group() {
        let mut c = AppConfig::default();
        c.apply_env_from(env(&[
            ("IPAD_WEBHOOK_URL", "http://localhost:8080/webhook"),
            ("TARGET_GROUPS", "Group A, Group B"),
            ("DEFAULT_GROUP_NAME", "Fallback"),
        ]));
        assert_eq!(c.webhook.unwrap().targets, vec!["Group A", "Group B"]);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let yaml = r#"
pipeline:
  max_articles: 0
  scrape_concurrency: 0
ranking:
  high: [launch]
schedule:
  daily_at: "8 o'clock"
webhook:
  url: not-a-url
sources:
  - name: Dup
    url: https://a.example.com
    category: ai
  - name: Dup
    url: ftp://b.example.com
    category: ai
    weight: -1
"#;
        let err = AppConfig::from_yaml(yaml).unwrap().validate().unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected Invalid");
        };
        let all = problems.join("\n");
        assert!(all.contains("pipeline.max_articles"));
        assert!(all.contains("pipeline.scrape_concurrency"));
        assert!(all.contains("launch"));
        assert!(all.contains("daily_at"));
        assert!(all.contains("webhook.url"));
        assert!(all.contains("webhook.targets"));
        assert!(all.contains("listed more than once"));
        assert!(all.contains("invalid weight"));
        assert!(all.contains("ftp://b.example.com"));
    }
}

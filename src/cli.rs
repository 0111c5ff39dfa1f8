//! Command-line interface definitions.
//!
//! Every flag can also come from the environment. Flags override the config
//! file, which overrides the built-in defaults.

use crate::config::AppConfig;
use crate::utils::split_csv;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How the process runs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Run once and exit. A failed run exits non-zero.
    #[default]
    Once,
    /// Run every day at `schedule.daily_at` until interrupted.
    Schedule,
    /// Serve the HTTP API; runs are triggered through it.
    Serve,
}

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # One run with the built-in source catalog
/// ai_news_digest
///
/// # Only two sources, archiving the digest as JSON
/// ai_news_digest --sources "量子位,机器之心" --archive-dir ./digests
///
/// # Daily at the configured time
/// ai_news_digest --mode schedule -c config.yaml
///
/// # HTTP API on port 9000
/// ai_news_digest --mode serve --port 9000
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Run mode
    #[arg(long, value_enum, env = "DIGEST_MODE", default_value_t = Mode::Once)]
    pub mode: Mode,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "DIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind in serve mode
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to bind in serve mode
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Comma-separated source names to crawl instead of the whole catalog
    #[arg(long)]
    pub sources: Option<String>,

    /// Cap on articles handed to the summarizer
    #[arg(long)]
    pub max_articles: Option<usize>,

    /// Directory for the per-day JSON digest archive
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Local time of the daily run in schedule mode, `HH:MM`
    #[arg(long)]
    pub daily_at: Option<String>,
}

impl Cli {
    /// Source subset from `--sources`, if any names were given.
    pub fn source_subset(&self) -> Option<Vec<String>> {
        self.sources
            .as_deref()
            .map(split_csv)
            .filter(|names| !names.is_empty())
    }

    /// Overlay the flags that were given onto `config`.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max) = self.max_articles {
            config.pipeline.max_articles = max;
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = Some(dir.clone());
        }
        if let Some(at) = &self.daily_at {
            config.schedule.daily_at = at.clone();
        }
    }
}

//! # AI News Digest
//!
//! A daily news pipeline that scrapes a catalog of AI and technology news
//! sources, keeps the most important stories and asks an LLM to turn them
//! into a short digest, which is then delivered to a record store, chat
//! groups and a local JSON archive.
//!
//! ## Features
//!
//! - Editable source catalog with per-source weight and extraction hints
//! - Keyword and weight based importance ranking with url deduplication
//! - Summary, trend list and image prompts from an OpenAI-compatible API,
//!   each with a fallback so a digest is always produced
//! - Delivery to a Feishu Bitable table, an iPad chat webhook and JSON files
//! - One-shot, daily schedule and HTTP API modes
//!
//! ## Usage
//!
//! ```sh
//! ai_news_digest --mode once --archive-dir ./digests
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Scraping**: Fetch every source's listing page concurrently
//! 2. **Normalizing**: Clean, validate and timestamp the raw items
//! 3. **Ranking**: Drop duplicate urls, score and sort by importance
//! 4. **Summarizing**: Ask the LLM for summary, trends and image prompts
//! 5. **Delivering**: Fan the digest out to every configured sink

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod digest;
mod error;
mod llm;
mod models;
mod normalize;
mod pipeline;
mod rank;
mod registry;
mod retry;
mod scheduler;
mod scrapers;
mod server;
mod sinks;
#[cfg(test)]
mod test_support;
mod utils;

use cli::{Cli, Mode};
use config::AppConfig;
use llm::OpenAiSummarizer;
use pipeline::Orchestrator;
use rank::{KeywordScorer, Ranker};
use registry::SharedRegistry;
use scrapers::html::HtmlScraper;
use sinks::bitable::BitableSink;
use sinks::json::JsonArchiveSink;
use sinks::webhook::WebhookSink;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "ai_news_digest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.mode, ?args.config, "Parsed CLI arguments");

    // ---- Load config: file, then environment, then flags ----
    let mut config = AppConfig::from_file(args.config.as_deref())?;
    config.apply_env();
    args.apply_to(&mut config);
    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration is invalid");
        return Err(e.into());
    }

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let subset = args.source_subset();

    match args.mode {
        Mode::Once => {
            let report = orchestrator
                .run_until(subset.as_deref(), shutdown_signal())
                .await?;
            let elapsed = start_time.elapsed();
            info!(
                ?elapsed,
                sources_ok = report.sources_succeeded,
                sources_total = report.sources_total,
                articles = report.summarized_count,
                deliveries_ok = report.deliveries_ok,
                deliveries_failed = report.deliveries_failed,
                "Execution complete"
            );
        }
        Mode::Schedule => {
            if subset.is_some() {
                warn!("--sources is ignored in schedule mode");
            }
            let at = config.schedule.time()?;
            scheduler::run_daily(orchestrator, at, shutdown_signal()).await;
        }
        Mode::Serve => {
            let state = server::AppState::new(orchestrator);
            server::serve(&config.server, state, shutdown_signal()).await?;
        }
    }

    Ok(())
}

/// Wire the configured collaborators into an orchestrator.
fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, Box<dyn Error>> {
    let p = &config.pipeline;

    let scraper = HtmlScraper::new(&p.user_agent, p.scrape_timeout())?;
    if config.llm.api_key.is_none() {
        warn!("No OPENAI_API_KEY configured; digests will use fallback text");
    }
    let summarizer = OpenAiSummarizer::new(config.llm.clone(), config.retry.llm, p.llm_timeout())?;
    let ranker = Ranker::new(Arc::new(KeywordScorer::from_tiers(&config.ranking)?));
    let registry = config.registry();
    info!(sources = registry.len(), "Source catalog loaded");

    let mut orchestrator = Orchestrator::new(
        SharedRegistry::new(registry),
        Arc::new(scraper),
        Arc::new(summarizer),
        ranker,
        p.clone(),
        config.retry,
    );

    match &config.bitable {
        Some(b) => {
            let sink = BitableSink::new(b.clone(), p.sink_timeout())?;
            let fields = sink.fields().clone();
            orchestrator = orchestrator.with_record_sink(Arc::new(sink), fields);
            info!(table_id = %b.table_id, "Bitable sink enabled");
        }
        None => info!("Bitable sink not configured"),
    }

    match &config.webhook {
        Some(w) if w.targets.is_empty() => {
            warn!("Webhook configured without target groups; nothing will be sent")
        }
        Some(w) => {
            let sink = WebhookSink::new(w.url.clone(), p.sink_timeout())?;
            orchestrator = orchestrator.with_message_sink(Arc::new(sink), w.targets.clone());
            info!(targets = w.targets.len(), "Webhook sink enabled");
        }
        None => info!("Webhook sink not configured"),
    }

    if let Some(dir) = &config.archive_dir {
        info!(dir = %dir.display(), "JSON archive enabled");
        orchestrator = orchestrator.with_archive(JsonArchiveSink::new(dir.clone()));
    }

    Ok(orchestrator)
}

/// Completes on Ctrl-C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!(error = %e, "Cannot listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

//! Pipeline orchestrator.
//!
//! One run walks a fixed sequence of states:
//!
//! ```text
//! Idle -> Scraping -> Normalizing -> Deduping -> Ranking -> Truncating
//!      -> Summarizing -> Assembled -> Delivering -> Done
//! ```
//!
//! and ends in `Failed` instead when no source yields an article or the run
//! is cancelled. Per-source and per-sink failures never end a run; they are
//! logged and counted in the [`RunReport`]. The current state is published
//! on a `watch` channel so the HTTP API can observe a run in progress.
//!
//! At most one run executes at a time per orchestrator.

use crate::config::{PipelineConfig, RetryConfig};
use crate::dedup::dedupe_with;
use crate::digest::{DigestAssembler, RecordFields, digest_to_record, group_message};
use crate::error::{FatalError, ScrapeError, SinkError, SummarizationError};
use crate::llm::{SummaryOutput, Summarizer, format_articles_for_llm};
use crate::models::{Article, Digest, RawArticle, Source};
use crate::normalize::Normalizer;
use crate::rank::Ranker;
use crate::registry::SharedRegistry;
use crate::scrapers::Scraper;
use crate::sinks::json::JsonArchiveSink;
use crate::sinks::{MessageSink, RecordSink};
use chrono::{DateTime, Local, Utc};
use futures::future::{BoxFuture, FutureExt, join_all};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scraping,
    Normalizing,
    Deduping,
    Ranking,
    Truncating,
    Summarizing,
    Assembled,
    Delivering,
    Done,
    Failed,
}

impl RunState {
    /// Whether a run is between its first and last state.
    pub fn is_active(self) -> bool {
        !matches!(self, RunState::Idle | RunState::Done | RunState::Failed)
    }
}

/// Outcome of one run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    #[serde(skip)]
    pub digest: Option<Digest>,
    /// Set when the run failed.
    pub error: Option<String>,
    pub sources_total: usize,
    pub sources_succeeded: usize,
    pub failed_sources: Vec<String>,
    pub raw_count: usize,
    pub normalized_count: usize,
    pub deduped_count: usize,
    /// Articles handed to the summarizer.
    pub summarized_count: usize,
    pub deliveries_ok: usize,
    pub deliveries_failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Idle,
            digest: None,
            error: None,
            sources_total: 0,
            sources_succeeded: 0,
            failed_sources: Vec::new(),
            raw_count: 0,
            normalized_count: 0,
            deduped_count: 0,
            summarized_count: 0,
            deliveries_ok: 0,
            deliveries_failed: 0,
            started_at,
            finished_at: None,
        }
    }
}

struct RecordTarget {
    sink: Arc<dyn RecordSink>,
    fields: RecordFields,
}

struct MessageTarget {
    sink: Arc<dyn MessageSink>,
    targets: Vec<String>,
}

pub struct Orchestrator {
    registry: SharedRegistry,
    scraper: Arc<dyn Scraper>,
    summarizer: Arc<dyn Summarizer>,
    normalizer: Normalizer,
    ranker: Ranker,
    assembler: DigestAssembler,
    settings: PipelineConfig,
    retry: RetryConfig,
    record_sinks: Vec<RecordTarget>,
    message_sinks: Vec<MessageTarget>,
    archive: Option<JsonArchiveSink>,
    state: watch::Sender<RunState>,
    run_lock: Arc<Mutex<()>>,
    last_report: RwLock<Option<RunReport>>,
    latest_digest: RwLock<Option<Digest>>,
    /// Report of the run in flight, kept current at every stage.
    progress: StdMutex<Option<RunReport>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("record_sinks", &self.record_sinks.len())
            .field("message_sinks", &self.message_sinks.len())
            .field("archive", &self.archive)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: SharedRegistry,
        scraper: Arc<dyn Scraper>,
        summarizer: Arc<dyn Summarizer>,
        ranker: Ranker,
        settings: PipelineConfig,
        retry: RetryConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            registry,
            scraper,
            summarizer,
            normalizer: Normalizer::new(settings.min_title_chars),
            ranker,
            assembler: DigestAssembler::new(settings.display_articles),
            settings,
            retry,
            record_sinks: Vec::new(),
            message_sinks: Vec::new(),
            archive: None,
            state,
            run_lock: Arc::new(Mutex::new(())),
            last_report: RwLock::new(None),
            latest_digest: RwLock::new(None),
            progress: StdMutex::new(None),
        }
    }

    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>, fields: RecordFields) -> Self {
        self.record_sinks.push(RecordTarget { sink, fields });
        self
    }

    pub fn with_message_sink(mut self, sink: Arc<dyn MessageSink>, targets: Vec<String>) -> Self {
        self.message_sinks.push(MessageTarget { sink, targets });
        self
    }

    pub fn with_archive(mut self, archive: JsonArchiveSink) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    pub async fn latest_digest(&self) -> Option<Digest> {
        self.latest_digest.read().await.clone()
    }

    fn set_state(&self, state: RunState) {
        info!(?state, "Pipeline state");
        self.state.send_replace(state);
    }

    /// Move the run to `state` and publish its report so far.
    fn enter(&self, report: &mut RunReport, state: RunState) {
        report.state = state;
        self.checkpoint(report);
        self.set_state(state);
    }

    fn checkpoint(&self, report: &RunReport) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }

    fn take_progress(&self) -> Option<RunReport> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn record_delivery(&self, ok: bool) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = progress.as_mut() {
            if ok {
                report.deliveries_ok += 1;
            } else {
                report.deliveries_failed += 1;
            }
        }
    }

    /// Number of deliveries one run attempts: every record sink, every
    /// message target and the archive.
    fn delivery_count(&self) -> usize {
        self.record_sinks.len()
            + self
                .message_sinks
                .iter()
                .map(|m| m.targets.len())
                .sum::<usize>()
            + usize::from(self.archive.is_some())
    }

    /// Run the pipeline once over the whole registry, or over the named
    /// subset of it.
    ///
    /// Scrapes every selected source concurrently, then normalizes, dedupes,
    /// ranks and truncates the articles, summarizes them and delivers the
    /// assembled digest to every configured sink. Sources and sinks that
    /// fail are logged and counted in the report; they never end the run.
    ///
    /// # Arguments
    ///
    /// * `subset` - Source names to crawl instead of the whole registry.
    ///   Unknown names are logged and ignored.
    ///
    /// # Returns
    ///
    /// The [`RunReport`] of a finished run, or a [`FatalError`] when no
    /// source was selected, no article survived scraping and normalization,
    /// or another run is already in progress.
    pub async fn run(&self, subset: Option<&[String]>) -> Result<RunReport, FatalError> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| FatalError::AlreadyRunning)?;
        self.run_locked(guard, subset).await
    }

    /// Like [`Orchestrator::run`], but gives up when `shutdown` completes
    /// first. In-flight work is dropped and nothing further is delivered.
    ///
    /// Cancelled before the digest is assembled, the run fails with
    /// [`FatalError::Cancelled`]. Cancelled while delivering, it still ends
    /// `Done`: the digest stands and the deliveries left unfinished are
    /// counted as failed.
    pub async fn run_until<F>(
        &self,
        subset: Option<&[String]>,
        shutdown: F,
    ) -> Result<RunReport, FatalError>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        tokio::select! {
            biased;
            result = self.run(subset) => result,
            _ = shutdown => {
                warn!("Run cancelled");
                self.cancelled(started_at).await
            }
        }
    }

    async fn cancelled(&self, started_at: DateTime<Utc>) -> Result<RunReport, FatalError> {
        let mut report = self
            .take_progress()
            .unwrap_or_else(|| RunReport::new(started_at));
        if report.digest.is_none() {
            return self.fail(report, FatalError::Cancelled).await;
        }

        let unfinished = self
            .delivery_count()
            .saturating_sub(report.deliveries_ok + report.deliveries_failed);
        report.deliveries_failed += unfinished;
        report.state = RunState::Done;
        report.error = Some(format!(
            "cancelled while delivering; {unfinished} deliveries left unfinished"
        ));
        report.finished_at = Some(Utc::now());
        warn!(
            unfinished,
            deliveries_ok = report.deliveries_ok,
            "Run cancelled after the digest was assembled"
        );
        *self.last_report.write().await = Some(report.clone());
        self.set_state(RunState::Done);
        Ok(report)
    }

    /// Start a run in the background. Fails immediately if one is active.
    pub fn spawn_run(
        self: &Arc<Self>,
        subset: Option<Vec<String>>,
    ) -> Result<JoinHandle<Result<RunReport, FatalError>>, FatalError> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| FatalError::AlreadyRunning)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run_locked(guard, subset.as_deref()).await
        }))
    }

    async fn fail(&self, mut report: RunReport, error: FatalError) -> Result<RunReport, FatalError> {
        self.take_progress();
        report.state = RunState::Failed;
        report.error = Some(error.to_string());
        report.finished_at = Some(Utc::now());
        error!(error = %error, "Run failed");
        *self.last_report.write().await = Some(report);
        self.set_state(RunState::Failed);
        Err(error)
    }

    #[instrument(level = "info", skip_all)]
    async fn run_locked(
        &self,
        _guard: OwnedMutexGuard<()>,
        subset: Option<&[String]>,
    ) -> Result<RunReport, FatalError> {
        let t0 = Instant::now();
        let mut report = RunReport::new(Utc::now());
        self.checkpoint(&report);

        let sources = self.select_sources(subset).await;
        report.sources_total = sources.len();
        self.checkpoint(&report);
        if sources.is_empty() {
            return self.fail(report, FatalError::NoSources).await;
        }

        // ---- Scraping ----
        self.enter(&mut report, RunState::Scraping);
        let scraped = self.scrape_all(&sources).await;
        let crawl_time = Utc::now();
        let mut raw: Vec<(usize, Vec<RawArticle>)> = Vec::with_capacity(scraped.len());
        for (idx, result) in scraped {
            match result {
                Ok(articles) => raw.push((idx, articles)),
                Err(e) => {
                    warn!(source = %sources[idx].name, error = %e, "Source skipped");
                    report.failed_sources.push(sources[idx].name.clone());
                }
            }
        }
        raw.sort_by_key(|(idx, _)| *idx);
        report.failed_sources.sort_by_key(|name| {
            sources
                .iter()
                .position(|s| &s.name == name)
                .unwrap_or(usize::MAX)
        });
        report.sources_succeeded = raw.len();
        report.raw_count = raw.iter().map(|(_, a)| a.len()).sum();
        if !report.failed_sources.is_empty() {
            warn!(
                succeeded = report.sources_succeeded,
                total = report.sources_total,
                failed = ?report.failed_sources,
                "Degraded source coverage"
            );
        }
        if report.raw_count == 0 {
            let attempted = report.sources_total;
            return self.fail(report, FatalError::NoArticles { attempted }).await;
        }

        // ---- Normalizing ----
        self.enter(&mut report, RunState::Normalizing);
        let normalized: Vec<Article> = raw
            .iter()
            .flat_map(|(idx, articles)| {
                let source = &sources[*idx];
                articles
                    .iter()
                    .filter_map(move |r| self.normalizer.normalize(r, source, crawl_time))
            })
            .collect();
        report.normalized_count = normalized.len();
        info!(raw = report.raw_count, normalized = normalized.len(), "Normalized articles");
        if normalized.is_empty() {
            let attempted = report.sources_total;
            return self.fail(report, FatalError::NoArticles { attempted }).await;
        }

        // ---- Deduping ----
        self.enter(&mut report, RunState::Deduping);
        let unique = dedupe_with(normalized, self.settings.dedup_policy);
        report.deduped_count = unique.len();

        // ---- Ranking ----
        self.enter(&mut report, RunState::Ranking);
        let mut ranked = self.ranker.rank(unique);

        // ---- Truncating ----
        self.enter(&mut report, RunState::Truncating);
        ranked.truncate(self.settings.max_articles);
        report.summarized_count = ranked.len();

        // ---- Summarizing ----
        self.enter(&mut report, RunState::Summarizing);
        let output = self.summarize(&ranked).await;

        let digest = self.assembler.assemble(
            output.summary.inspect_err(|e| warn!(field = "summary", error = %e, "Summarizer field failed")).ok(),
            output.trends.inspect_err(|e| warn!(field = "trends", error = %e, "Summarizer field failed")).ok(),
            output
                .image_prompts
                .inspect_err(|e| warn!(field = "image_prompts", error = %e, "Summarizer field failed"))
                .ok(),
            ranked,
            report.summarized_count,
            Local::now(),
        );
        report.digest = Some(digest.clone());
        *self.latest_digest.write().await = Some(digest.clone());
        self.enter(&mut report, RunState::Assembled);

        // ---- Delivering ----
        self.enter(&mut report, RunState::Delivering);
        let (ok, failed) = self.deliver_all(&digest).await;
        report.deliveries_ok = ok;
        report.deliveries_failed = failed;

        report.state = RunState::Done;
        report.finished_at = Some(Utc::now());
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            sources_ok = report.sources_succeeded,
            sources_total = report.sources_total,
            deduped = report.deduped_count,
            deliveries_ok = ok,
            deliveries_failed = failed,
            "Run complete"
        );
        self.take_progress();
        *self.last_report.write().await = Some(report.clone());
        self.set_state(RunState::Done);
        Ok(report)
    }

    async fn select_sources(&self, subset: Option<&[String]>) -> Vec<Source> {
        let all = self.registry.snapshot().await;
        let Some(names) = subset else {
            return all;
        };
        for name in names {
            if !all.iter().any(|s| &s.name == name) {
                warn!(source = %name, "Requested source is not registered; ignoring");
            }
        }
        all.into_iter()
            .filter(|s| names.iter().any(|n| n == &s.name))
            .collect()
    }

    /// Scrape every source with bounded concurrency. Results come back in
    /// completion order, tagged with the source's registry index.
    async fn scrape_all(&self, sources: &[Source]) -> Vec<(usize, Result<Vec<RawArticle>, ScrapeError>)> {
        let concurrency = self.settings.scrape_concurrency.max(1);
        info!(sources = sources.len(), concurrency, "Scraping sources");
        let jobs: Vec<BoxFuture<'_, (usize, Result<Vec<RawArticle>, ScrapeError>)>> = sources
            .iter()
            .enumerate()
            .map(|(idx, source)| async move { (idx, self.scrape_one(source).await) }.boxed())
            .collect();
        stream::iter(jobs)
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    async fn scrape_one(&self, source: &Source) -> Result<Vec<RawArticle>, ScrapeError> {
        let limit = self.settings.scrape_timeout();
        let articles = self
            .retry
            .scraper
            .run(&source.name, || async {
                timeout(limit, self.scraper.scrape(source))
                    .await
                    .unwrap_or(Err(ScrapeError::Timeout(limit.as_secs())))
            })
            .await?;
        if articles.is_empty() {
            return Err(ScrapeError::Empty);
        }
        debug!(source = %source.name, count = articles.len(), "Source scraped");
        Ok(articles)
    }

    async fn summarize(&self, ranked: &[Article]) -> SummaryOutput {
        let text = format_articles_for_llm(ranked);
        let limit = self.settings.llm_timeout();
        match timeout(limit, self.summarizer.summarize(&text)).await {
            Ok(output) => output,
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Summarizer timed out");
                SummaryOutput::failed(|| SummarizationError::Timeout(limit.as_secs()))
            }
        }
    }

    /// One delivery attempt loop: sink timeout around every attempt, sink retry policy around that.
    async fn deliver<F, Fut>(&self, what: &str, mut op: F) -> Result<(), SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SinkError>>,
    {
        let limit = self.settings.sink_timeout();
        self.retry
            .sinks
            .run(what, || {
                let attempt = op();
                async move {
                    timeout(limit, attempt)
                        .await
                        .unwrap_or(Err(SinkError::Timeout(limit.as_secs())))
                }
            })
            .await
    }

    /// Deliver to every sink and target concurrently. Returns (ok, failed).
    async fn deliver_all(&self, digest: &Digest) -> (usize, usize) {
        let message = group_message(digest);
        let mut jobs: Vec<BoxFuture<'_, (String, Result<(), SinkError>)>> = Vec::new();

        for target in &self.record_sinks {
            jobs.push(
                async move {
                    let name = target.sink.name().to_string();
                    let result = match digest_to_record(digest, &target.fields) {
                        Ok(record) => self.deliver(&name, || target.sink.write(&record)).await,
                        Err(e) => Err(e.into()),
                    };
                    (name, result)
                }
                .boxed(),
            );
        }

        for target in &self.message_sinks {
            for group in &target.targets {
                let message = &message;
                jobs.push(
                    async move {
                        let name = format!("{}:{}", target.sink.name(), group);
                        let result = self.deliver(&name, || target.sink.send(group, message)).await;
                        (name, result)
                    }
                    .boxed(),
                );
            }
        }

        if let Some(archive) = &self.archive {
            jobs.push(
                async move {
                    let name = archive.name().to_string();
                    let result = self
                        .deliver(&name, || async { archive.write_digest(digest).await.map(|_| ()) })
                        .await;
                    (name, result)
                }
                .boxed(),
            );
        }

        if jobs.is_empty() {
            info!("No sinks configured; digest not delivered");
            return (0, 0);
        }

        let results = join_all(jobs.into_iter().map(|job| async move {
            let (name, result) = job.await;
            self.record_delivery(result.is_ok());
            (name, result)
        }))
        .await;
        let mut ok = 0;
        let mut failed = 0;
        for (name, result) in results {
            match result {
                Ok(()) => {
                    ok += 1;
                    info!(sink = %name, "Delivered");
                }
                Err(e) => {
                    failed += 1;
                    error!(sink = %name, error = %e, "Delivery failed");
                }
            }
        }
        (ok, failed)
    }
}

//! Daily schedule: run the pipeline once a day at a fixed local time.

use crate::error::FatalError;
use crate::pipeline::Orchestrator;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use futures::FutureExt;
use futures::future::FusedFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

/// First moment strictly after `now` whose wall-clock time is `at`.
///
/// Local times skipped by a DST jump move forward to the first valid minute.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    loop {
        let mut candidate = day.and_time(at);
        for _ in 0..120 {
            if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
                if t > *now {
                    return t;
                }
                break;
            }
            candidate += ChronoDuration::minutes(1);
        }
        day = day.succ_opt().unwrap_or(day);
    }
}

/// Run the pipeline every day at `at` (local time) until `shutdown` completes.
/// A failed run is logged and the schedule carries on.
#[instrument(level = "info", skip_all, fields(daily_at = %at))]
pub async fn run_daily<F>(orchestrator: Arc<Orchestrator>, at: NaiveTime, shutdown: F)
where
    F: Future<Output = ()>,
{
    let shutdown = shutdown.fuse();
    tokio::pin!(shutdown);
    loop {
        let now = Local::now();
        let next = next_occurrence(&now, at);
        let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
        info!(next_run = %next.to_rfc3339(), wait_secs = wait.as_secs(), "Waiting for next scheduled run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("Scheduler stopped");
                return;
            }
        }

        match orchestrator.run_until(None, &mut shutdown).await {
            Ok(report) if shutdown.is_terminated() => {
                info!(
                    deliveries_ok = report.deliveries_ok,
                    deliveries_failed = report.deliveries_failed,
                    "Scheduler stopped while delivering"
                );
                return;
            }
            Ok(report) => info!(
                sources_ok = report.sources_succeeded,
                deliveries_ok = report.deliveries_ok,
                "Scheduled run finished"
            ),
            Err(FatalError::Cancelled) => {
                info!("Scheduler stopped during a run");
                return;
            }
            Err(e) => error!(error = %e, "Scheduled run failed; will try again tomorrow"),
        }
    }
}

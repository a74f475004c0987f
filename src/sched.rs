// SPDX-License-Identifier: MIT
//! Poll scheduling — one immediate run, then a recurring interval plus two
//! fixed local times of day, all feeding the same sequential execution path.
//!
//! Runs never overlap: the next wait is computed only after the previous
//! cycle finishes. A cycle that aborts (panics inside the spawned task) is
//! logged and followed by the error-retry backoff; only a termination signal
//! stops the loop.

use crate::config::ScheduleConfig;
use crate::orchestrator::ReviewPipeline;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Time until the next trigger: the sooner of "interval from now" and the
/// next occurrence of any fixed daily time (today if still ahead, else
/// tomorrow). Pure so the schedule arithmetic is testable.
pub fn next_wait(now: NaiveDateTime, interval: Duration, daily: &[NaiveTime]) -> Duration {
    let mut wait = interval;

    for &time in daily {
        let next_occurrence = if time > now.time() {
            now.date().and_time(time)
        } else {
            now.date().succ_opt().unwrap_or(now.date()).and_time(time)
        };
        if let Ok(until) = (next_occurrence - now).to_std() {
            wait = wait.min(until);
        }
    }

    wait
}

/// Parse the configured "HH:MM" trigger times, dropping (and logging) any
/// that do not parse — a bad entry must not kill the schedule.
pub fn parse_daily_times(times: &[&str]) -> Vec<NaiveTime> {
    times
        .iter()
        .filter_map(|raw| match NaiveTime::parse_from_str(raw, "%H:%M") {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(time = raw, err = %e, "ignoring unparseable daily trigger time");
                None
            }
        })
        .collect()
}

/// Steady-state loop: immediate cycle, then wait-and-run until a termination
/// signal arrives.
pub async fn run_loop(pipeline: Arc<ReviewPipeline>, schedule: &ScheduleConfig) {
    let interval = Duration::from_secs(schedule.interval_minutes * 60);
    let daily = parse_daily_times(&[schedule.morning.as_str(), schedule.afternoon.as_str()]);
    let error_retry = Duration::from_secs(schedule.error_retry_secs);

    run_guarded(&pipeline, error_retry).await;

    loop {
        let wait = next_wait(Local::now().naive_local(), interval, &daily);
        info!(secs = wait.as_secs(), "next poll scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                run_guarded(&pipeline, error_retry).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("termination signal received — stopping");
                break;
            }
        }
    }
}

/// Run one cycle in a task so an unexpected abort is contained: it is logged
/// and followed by the backoff sleep, and the schedule loop continues.
async fn run_guarded(pipeline: &Arc<ReviewPipeline>, error_retry: Duration) {
    let p = Arc::clone(pipeline);
    match tokio::spawn(async move { p.run_cycle().await }).await {
        Ok(_summary) => {}
        Err(e) => {
            error!(err = %e, "poll cycle aborted — backing off before next trigger");
            tokio::time::sleep(error_retry).await;
        }
    }
}

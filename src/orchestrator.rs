// SPDX-License-Identifier: MIT
//! Review pipeline orchestrator.
//!
//! Drives one poll cycle: list open changes, gate each against the tracking
//! store, walk its files through filter → diff → content → generator, then
//! post the aggregated comment and mark the revision reviewed only when the
//! post (or trivial no-post) succeeded. Errors are isolated at the change
//! boundary — one bad change never affects its siblings.

use crate::comment::{self, Fragment};
use crate::config::ReviewdConfig;
use crate::filter::should_review;
use crate::generator::{ReviewGenerator, ReviewOutcome};
use crate::source::{Change, ChangeSource};
use crate::tracker::ReviewTracker;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// Terminal state of one change within one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// `(change_id, current_revision)` already in the tracking store.
    Skipped,
    /// Nothing survived the file filter and size cap. Trivially successful —
    /// the revision is marked reviewed.
    NoEligibleFiles,
    /// Files were reviewed but every result was the no-issues sentinel (or an
    /// empty diff). Trivially successful — marked reviewed.
    NothingToPost { suppressed: usize },
    /// Comment posted and revision marked reviewed.
    Posted { fragments: usize, suppressed: usize },
    /// Both the normal and the summarized post failed. NOT marked reviewed —
    /// the same revision is retried in full next cycle.
    PostFailed,
}

/// Per-cycle accounting, logged when the cycle ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub changes_seen: usize,
    pub skipped: usize,
    pub no_eligible_files: usize,
    pub nothing_to_post: usize,
    pub posted: usize,
    pub post_failed: usize,
    pub errored: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &ChangeOutcome) {
        match outcome {
            ChangeOutcome::Skipped => self.skipped += 1,
            ChangeOutcome::NoEligibleFiles => self.no_eligible_files += 1,
            ChangeOutcome::NothingToPost { .. } => self.nothing_to_post += 1,
            ChangeOutcome::Posted { .. } => self.posted += 1,
            ChangeOutcome::PostFailed => self.post_failed += 1,
        }
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

pub struct ReviewPipeline {
    config: Arc<ReviewdConfig>,
    source: Arc<dyn ChangeSource>,
    generator: Arc<dyn ReviewGenerator>,
    tracker: ReviewTracker,
}

impl ReviewPipeline {
    pub fn new(
        config: Arc<ReviewdConfig>,
        source: Arc<dyn ChangeSource>,
        generator: Arc<dyn ReviewGenerator>,
    ) -> Self {
        let tracker = ReviewTracker::new(config.tracking_file.clone());
        Self {
            config,
            source,
            generator,
            tracker,
        }
    }

    /// Run one poll cycle over all open changes, strictly sequentially.
    pub async fn run_cycle(&self) -> RunSummary {
        info!("poll cycle started");
        let changes = self.source.list_open_changes().await;
        info!(count = changes.len(), "open changes to consider");

        let mut summary = RunSummary {
            changes_seen: changes.len(),
            ..RunSummary::default()
        };

        for change in &changes {
            match self.process_change(change).await {
                Ok(outcome) => {
                    debug!(change = change.number, outcome = ?outcome, "change processed");
                    summary.record(&outcome);
                    if outcome == ChangeOutcome::Skipped {
                        continue;
                    }
                }
                Err(e) => {
                    // Change-boundary isolation: log with the human-readable
                    // subject and move on to the next change.
                    warn!(
                        change = change.number,
                        subject = %change.subject,
                        err = %format!("{e:#}"),
                        "error while processing change"
                    );
                    summary.errored += 1;
                }
            }

            // Keep the remote and the shared AI backend under their rate
            // budgets, whether the change succeeded or not.
            tokio::time::sleep(Duration::from_secs(self.config.review.inter_change_delay_secs))
                .await;
        }

        info!(
            seen = summary.changes_seen,
            skipped = summary.skipped,
            posted = summary.posted,
            nothing_to_post = summary.nothing_to_post,
            no_eligible_files = summary.no_eligible_files,
            post_failed = summary.post_failed,
            errored = summary.errored,
            "poll cycle finished"
        );
        summary
    }

    /// Drive one change through the state machine.
    async fn process_change(&self, change: &Change) -> Result<ChangeOutcome> {
        if self
            .tracker
            .is_reviewed(&change.change_id, &change.current_revision)?
        {
            debug!(change = change.number, subject = %change.subject, "already reviewed");
            return Ok(ChangeOutcome::Skipped);
        }

        info!(change = change.number, subject = %change.subject, owner = %change.owner, "reviewing");

        let files = self.source.list_changed_files(change.number).await;
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut suppressed = 0usize;
        let mut eligible = 0usize;

        for (path, file) in &files {
            if !should_review(path) {
                continue;
            }
            if file.lines_changed() > self.config.limits.max_lines_changed {
                info!(
                    path,
                    lines = file.lines_changed(),
                    cap = self.config.limits.max_lines_changed,
                    "file exceeds churn cap — skipping"
                );
                continue;
            }
            eligible += 1;

            let diff = self
                .source
                .file_diff(change.number, change.patchset_number, file)
                .await;
            if diff.is_empty() {
                debug!(path, "no change representation available — skipping file");
                continue;
            }

            // Full content is opportunistic context; too large means none.
            let mut content = self.source.file_content(change.number, path).await;
            if content.len() > self.config.limits.max_content_bytes {
                debug!(
                    path,
                    bytes = content.len(),
                    cap = self.config.limits.max_content_bytes,
                    "full content too large — reviewing diff in isolation"
                );
                content.clear();
            }

            match self.generator.review_file(path, &diff, &content).await {
                ReviewOutcome::NoFindings => suppressed += 1,
                ReviewOutcome::Findings(text) => fragments.push(Fragment {
                    path: path.clone(),
                    text,
                }),
            }
        }

        if eligible == 0 {
            self.mark_reviewed(change)?;
            info!(change = change.number, "no eligible files");
            return Ok(ChangeOutcome::NoEligibleFiles);
        }

        if fragments.is_empty() {
            self.mark_reviewed(change)?;
            info!(change = change.number, suppressed, "nothing to post");
            return Ok(ChangeOutcome::NothingToPost { suppressed });
        }

        match comment::post_review(
            self.source.as_ref(),
            change.number,
            change.patchset_number,
            &fragments,
            self.config.review.score,
            self.config.limits.comment_max_bytes,
        )
        .await
        {
            Ok(()) => {
                self.mark_reviewed(change)?;
                info!(
                    change = change.number,
                    fragments = fragments.len(),
                    suppressed,
                    "review posted"
                );
                Ok(ChangeOutcome::Posted {
                    fragments: fragments.len(),
                    suppressed,
                })
            }
            Err(e) => {
                // Deliberately not marked reviewed: the absence of a tracking
                // entry is what schedules the retry next cycle.
                warn!(change = change.number, err = %e, "post failed — will retry next cycle");
                Ok(ChangeOutcome::PostFailed)
            }
        }
    }

    fn mark_reviewed(&self, change: &Change) -> Result<()> {
        self.tracker
            .mark_reviewed(&change.change_id, &change.current_revision)
            .with_context(|| format!("failed to record review of change {}", change.number))
    }
}

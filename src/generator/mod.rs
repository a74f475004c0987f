// SPDX-License-Identifier: MIT
//! Review generator — the seam between the pipeline and the AI backend.
//!
//! Backends differ (CLI subprocess today, HTTP API or something stranger
//! tomorrow) but the orchestrator only ever sees [`ReviewOutcome`]. The
//! "no issues" sentinel is produced in exactly one place
//! ([`ReviewOutcome::from_raw`]) and consumed in exactly one place (the
//! orchestrator's fragment collection).

pub mod claude;

use async_trait::async_trait;

/// The literal reply that means "nothing worth commenting on".
///
/// The prompt instructs the backend to answer with this exact phrase, and the
/// classification below matches it by exact equality after trimming — a longer
/// critique that merely contains the phrase is still a finding.
pub const NO_ISSUES_SENTINEL: &str = "no issues found";

/// Classified result of one per-file review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The backend explicitly reported nothing to say.
    NoFindings,
    /// Review text to include as a fragment — also carries the sentinel
    /// texts for generation timeout/failure, which are worth surfacing in
    /// the posted comment rather than silently dropping the file.
    Findings(String),
}

impl ReviewOutcome {
    /// Classify a raw backend reply.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == NO_ISSUES_SENTINEL {
            Self::NoFindings
        } else {
            Self::Findings(trimmed.to_string())
        }
    }
}

/// One-method capability: review a single file from its diff (and optional
/// full content). Implementations convert every internal failure — timeout,
/// spawn error, non-zero exit — into a sentinel `Findings` text; they never
/// propagate errors into the pipeline.
#[async_trait]
pub trait ReviewGenerator: Send + Sync {
    async fn review_file(&self, path: &str, diff: &str, full_content: &str) -> ReviewOutcome;

    /// Cheap round-trip probe used by the startup connectivity check.
    async fn check_connectivity(&self) -> anyhow::Result<()>;
}

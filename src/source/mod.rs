// SPDX-License-Identifier: MIT
//! Change source — the seam between the pipeline and the review server.
//!
//! Everything past this boundary works with the typed [`Change`] / [`FileInfo`]
//! entities; raw wire responses never escape the implementation. List/fetch
//! operations degrade to empty results on transport failure (logged at the
//! boundary) so one flaky call cannot abort a poll cycle. Posting is the one
//! operation whose failure kind the orchestrator matches on.

pub mod gerrit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Entities ─────────────────────────────────────────────────────────────────

/// One reviewable unit on the server, identified stably across revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Stable opaque identifier, unique for the server's lifetime.
    pub change_id: String,
    /// Server-local sequence number, used in follow-up API calls.
    pub number: u64,
    pub subject: String,
    /// Author identity — opaque, kept only for logging.
    pub owner: String,
    pub status: ChangeStatus,
    /// Identifier of the latest patchset. Changes iff the content changes;
    /// this is the unit of dedup in the tracking store.
    pub current_revision: String,
    /// Patchset sequence number of `current_revision`.
    pub patchset_number: u64,
    /// Last-updated timestamp (epoch seconds).
    pub updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    Open,
    Merged,
    Abandoned,
    Unknown,
}

/// Per-file stats for a change's current patchset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub lines_inserted: u64,
    pub lines_deleted: u64,
    pub kind: ChangeKind,
}

impl FileInfo {
    /// Total churn — the size-cap gate compares this against the configured limit.
    pub fn lines_changed(&self) -> u64 {
        self.lines_inserted + self.lines_deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Rewritten,
    Unknown,
}

/// Changed-file set keyed by repo-relative path. BTreeMap keeps iteration
/// order stable so runs are reproducible and logs diff cleanly.
pub type FileMap = BTreeMap<String, FileInfo>;

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Why a comment post failed. The orchestrator retries once with a shortened
/// summary only on `TooLarge`; everything else is terminal for the cycle.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("comment rejected by size limit: {0}")]
    TooLarge(String),
    #[error("comment post failed: {0}")]
    Transport(String),
}

// ─── ChangeSource ─────────────────────────────────────────────────────────────

/// Narrow interface to the review server. Implementations own the transport
/// (SSH command execution, REST) and all wire-format parsing.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open changes matching the configured query window.
    ///
    /// Returns an empty list on any transport or parse failure — the error is
    /// logged and swallowed here so one outage does not abort the poll cycle.
    async fn list_open_changes(&self) -> Vec<Change>;

    /// Files in the change's current patchset, excluding the commit-message
    /// pseudo-file. Empty map on any failure.
    async fn list_changed_files(&self, change_number: u64) -> FileMap;

    /// Best-effort change representation for one file.
    ///
    /// Degrades through tiers: precise diff, then a metadata-derived summary,
    /// then empty string. Callers treat empty as "skip this file".
    async fn file_diff(&self, change_number: u64, patchset_number: u64, file: &FileInfo) -> String;

    /// Full current content of a file, or empty string when unavailable.
    /// Supplementary context only — never required.
    async fn file_content(&self, change_number: u64, path: &str) -> String;

    /// Submit a review comment, optionally with a coarse score.
    async fn post_comment(
        &self,
        change_number: u64,
        patchset_number: u64,
        text: &str,
        score: i32,
    ) -> Result<(), PostError>;

    /// Cheap reachability probe used by the startup connectivity check.
    async fn check_connectivity(&self) -> anyhow::Result<()>;
}

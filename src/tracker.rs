// SPDX-License-Identifier: MIT
//! Review tracker — append-only idempotency ledger.
//!
//! One line per fully processed revision, formatted `<change_id>:<revision_id>`.
//! Lines are never rewritten or deleted; membership is exact line equality.
//! The file is re-read on every query so a store appended to by an earlier
//! run (or mid-cycle) is always honored.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

pub struct ReviewTracker {
    path: PathBuf,
}

impl ReviewTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Has this exact `(change_id, revision_id)` pair been fully processed?
    ///
    /// A missing store file means nothing has been reviewed yet.
    pub fn is_reviewed(&self, change_id: &str, revision_id: &str) -> Result<bool> {
        let key = tracking_key(change_id, revision_id);
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read tracking store {}", self.path.display()))
            }
        };
        Ok(contents.lines().any(|line| line == key))
    }

    /// Append a completed `(change_id, revision_id)` pair.
    ///
    /// Callers invoke this only after the change's comment was posted (or
    /// nothing needed posting) — a failed append must surface, since silently
    /// dropping it would re-review the change forever.
    pub fn mark_reviewed(&self, change_id: &str, revision_id: &str) -> Result<()> {
        let key = tracking_key(change_id, revision_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open tracking store {}", self.path.display()))?;
        writeln!(file, "{key}")
            .with_context(|| format!("failed to append to tracking store {}", self.path.display()))
    }
}

fn tracking_key(change_id: &str, revision_id: &str) -> String {
    format!("{change_id}:{revision_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_tracker() -> (tempfile::TempDir, ReviewTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ReviewTracker::new(dir.path().join("reviewed_changes.txt"));
        (dir, tracker)
    }

    #[test]
    fn missing_file_means_nothing_reviewed() {
        let (_dir, tracker) = temp_tracker();
        assert!(!tracker.is_reviewed("Iabc", "r1").unwrap());
    }

    #[test]
    fn mark_then_query_round_trip() {
        let (_dir, tracker) = temp_tracker();
        tracker.mark_reviewed("Iabc", "r1").unwrap();
        assert!(tracker.is_reviewed("Iabc", "r1").unwrap());
        assert!(!tracker.is_reviewed("Iabc", "r2").unwrap());
        assert!(!tracker.is_reviewed("Idef", "r1").unwrap());
    }

    #[test]
    fn new_revision_of_reviewed_change_is_not_reviewed() {
        let (_dir, tracker) = temp_tracker();
        tracker.mark_reviewed("Iabc", "r1").unwrap();
        tracker.mark_reviewed("Iabc", "r2").unwrap();
        assert!(tracker.is_reviewed("Iabc", "r1").unwrap());
        assert!(tracker.is_reviewed("Iabc", "r2").unwrap());
        assert!(!tracker.is_reviewed("Iabc", "r3").unwrap());
    }

    #[test]
    fn membership_is_exact_line_equality() {
        let (_dir, tracker) = temp_tracker();
        tracker.mark_reviewed("Iabc", "r10").unwrap();
        // "Iabc:r1" is a prefix of the stored line, not a member.
        assert!(!tracker.is_reviewed("Iabc", "r1").unwrap());
    }

    #[test]
    fn store_is_append_only_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviewed_changes.txt");

        ReviewTracker::new(&path).mark_reviewed("Iabc", "r1").unwrap();
        ReviewTracker::new(&path).mark_reviewed("Idef", "r1").unwrap();

        let tracker = ReviewTracker::new(&path);
        assert!(tracker.is_reviewed("Iabc", "r1").unwrap());
        assert!(tracker.is_reviewed("Idef", "r1").unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Iabc:r1\nIdef:r1\n");
    }
}

// SPDX-License-Identifier: MIT
//! Claude CLI review generator.
//!
//! Invokes `claude --print <prompt>` as a subprocess with a bounded timeout.
//! Two prompt templates: one that cites changed lines when the input looks
//! like a real unified diff, one that reviews from a metadata summary when it
//! does not. Full file content, when present and long enough to be useful, is
//! attached as additional context with a cross-file consistency ask.

use super::{ReviewGenerator, ReviewOutcome, NO_ISSUES_SENTINEL};
use crate::config::ReviewConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Full content shorter than this adds noise, not context.
const MIN_USEFUL_CONTENT_LEN: usize = 50;

/// Unified-diff hunk header, e.g. `@@ -1,3 +1,4 @@`.
static HUNK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^@@ -\d+(?:,\d+)? \+\d+(?:,\d+)? @@").expect("static regex"));

/// Why an invocation produced no review text.
#[derive(Debug, thiserror::Error)]
enum InvokeError {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Failed(String),
}

pub struct ClaudeCli {
    cfg: ReviewConfig,
}

impl ClaudeCli {
    pub fn new(cfg: ReviewConfig) -> Self {
        Self { cfg }
    }

    /// Run `claude --print <prompt>` and return raw stdout.
    async fn invoke(&self, prompt: &str) -> Result<String, InvokeError> {
        let run = tokio::time::timeout(
            Duration::from_secs(self.cfg.timeout_secs),
            Command::new(&self.cfg.claude_bin)
                .arg("--print")
                .arg(prompt)
                .stdin(std::process::Stdio::null())
                .output(),
        )
        .await;

        let output = match run {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                return Err(InvokeError::Failed(format!(
                    "failed to spawn `{}`: {e} — is it installed and on PATH?",
                    self.cfg.claude_bin
                )))
            }
            Err(_) => return Err(InvokeError::Timeout(self.cfg.timeout_secs)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InvokeError::Failed(format!(
                "exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ReviewGenerator for ClaudeCli {
    async fn review_file(&self, path: &str, diff: &str, full_content: &str) -> ReviewOutcome {
        let prompt = build_prompt(path, diff, full_content);
        debug!(path, prompt_bytes = prompt.len(), "requesting review");

        // Timeout and failure become sentinel findings — surfaced in the
        // posted comment, never retried within the cycle.
        match self.invoke(&prompt).await {
            Ok(stdout) => ReviewOutcome::from_raw(&extract_response(&stdout)),
            Err(InvokeError::Timeout(secs)) => {
                warn!(path, secs, "review generation timed out");
                ReviewOutcome::Findings("review generation timed out".to_string())
            }
            Err(InvokeError::Failed(cause)) => {
                warn!(path, err = %cause, "review generation failed");
                ReviewOutcome::Findings(format!("review generation failed: {cause}"))
            }
        }
    }

    async fn check_connectivity(&self) -> Result<()> {
        let reply = self
            .invoke("Reply with the single word: ok")
            .await
            .map_err(|e| anyhow!("claude CLI connectivity check failed: {e}"))?;
        info!(reply = %reply.trim(), "claude CLI reachable");
        Ok(())
    }
}

// ─── Prompt construction ──────────────────────────────────────────────────────

/// Does this text plausibly carry line-level diff detail?
///
/// Either a hunk header, or at least three added/removed lines (excluding the
/// `+++` / `---` file headers). Metadata summaries fail both tests.
fn has_diff_markers(diff: &str) -> bool {
    if HUNK_HEADER.is_match(diff) {
        return true;
    }
    let marker_lines = diff
        .lines()
        .filter(|l| {
            (l.starts_with('+') && !l.starts_with("+++"))
                || (l.starts_with('-') && !l.starts_with("---"))
        })
        .count();
    marker_lines >= 3
}

fn build_prompt(path: &str, diff: &str, full_content: &str) -> String {
    let with_context = full_content.len() > MIN_USEFUL_CONTENT_LEN;
    let mut prompt = String::new();

    prompt.push_str(&format!("Review the following code change.\n\nFile: {path}\n\n"));

    if with_context {
        prompt.push_str(&format!(
            "Current full file content:\n```\n{full_content}\n```\n\n"
        ));
    }

    if has_diff_markers(diff) {
        prompt.push_str(&format!("Changed content (unified diff):\n```diff\n{diff}\n```\n\n"));
        prompt.push_str(
            "Cite the specific changed lines you are commenting on. Review for:\n",
        );
    } else {
        prompt.push_str(&format!("Change summary (no line-level diff is available):\n{diff}\n\n"));
        prompt.push_str(
            "No line-level detail exists, so review from the summary above only — \
             do not invent specific lines. Review for:\n",
        );
    }

    prompt.push_str(
        "1. Possible bugs or logic errors\n\
         2. Performance issues\n\
         3. Security vulnerabilities\n\
         4. Coding style and best practices\n\
         5. Test coverage needs\n",
    );

    if with_context {
        prompt.push_str(
            "6. Consistency with the rest of the file: naming conventions, \
             call-site compatibility, dependency and call relationships\n",
        );
    }

    prompt.push_str(&format!(
        "\nGive concrete, actionable feedback. If there is nothing worth \
         raising, reply with exactly: {NO_ISSUES_SENTINEL}"
    ));

    prompt
}

// ─── Response extraction ──────────────────────────────────────────────────────

/// Pull the useful text out of the CLI's stdout.
///
/// Some output modes emit a JSON array of turn records; in that case the
/// content of the last `role == "assistant"` record wins. Anything else is
/// returned as trimmed raw text.
fn extract_response(stdout: &str) -> String {
    let trimmed = stdout.trim();
    let Ok(Value::Array(turns)) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };

    for turn in turns.iter().rev() {
        if turn.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(content) = turn.get("content") else {
            continue;
        };
        match content {
            Value::String(s) => return s.clone(),
            // Content blocks: concatenate the text parts.
            Value::Array(blocks) => {
                let text: String = blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                if !text.is_empty() {
                    return text;
                }
            }
            _ => {}
        }
    }

    trimmed.to_string()
}

// SPDX-License-Identifier: MIT
//! Comment assembly and posting.
//!
//! Per-file fragments are joined under a fixed header and an AI-disclaimer
//! footer, the whole thing is held under the server's byte ceiling (truncated
//! at a char boundary, never mid-codepoint), and a rejected oversize post is
//! retried exactly once with a shortened keyword summary.

use crate::source::{ChangeSource, PostError};
use tracing::{info, warn};

const COMMENT_HEADER: &str = "🤖 **Automated AI Code Review**\n\n";
const COMMENT_FOOTER: &str = "\n\n---\n*This review was generated automatically by an AI \
                              assistant. Treat it as advisory; the final judgement belongs \
                              to a human reviewer.*";
const TRUNCATION_NOTICE: &str = "\n\n… *(review truncated to fit the comment size limit)*";
const SUMMARY_PREAMBLE: &str = "*(shortened summary — the full review exceeded the comment \
                                size limit)*\n\n";
const GENERIC_SUMMARY: &str = "The full review exceeded the server's comment size limit and \
                               could not be summarized automatically. Re-run the reviewer \
                               locally for the complete text.";

/// Keep at most this many extracted lines in the shortened summary.
const SUMMARY_MAX_LINES: usize = 20;
/// Fewer extracted lines than this is not a useful summary.
const SUMMARY_MIN_LINES: usize = 3;

/// One file's contribution to the aggregated comment.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub path: String,
    pub text: String,
}

// ─── Assembly ─────────────────────────────────────────────────────────────────

/// Header + `**<path>**\n<review>` blocks joined by blank lines + footer.
pub fn assemble(fragments: &[Fragment]) -> String {
    let body = fragments
        .iter()
        .map(|f| format!("**{}**\n{}", f.path, f.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{COMMENT_HEADER}{body}{COMMENT_FOOTER}")
}

/// Hold `text` strictly under `max_bytes` encoded bytes.
///
/// When over, cut at the largest char boundary that leaves room for the
/// truncation notice and append the notice — the result never splits a
/// multi-byte character and its byte length is strictly less than the limit.
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() < max_bytes {
        return text.to_string();
    }

    let budget = max_bytes.saturating_sub(TRUNCATION_NOTICE.len() + 1);
    let mut cut = budget.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = text[..cut].to_string();
    truncated.push_str(TRUNCATION_NOTICE);
    truncated
}

/// Extract the high-signal lines of an oversize review: headers, emphasis,
/// bullets, and severity keywords. Falls back to a fixed generic message when
/// too little survives to be useful.
pub fn summarize(full: &str) -> String {
    let extracted: Vec<&str> = full
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            let lowered = line.to_ascii_lowercase();
            line.contains("**")
                || trimmed.starts_with('#')
                || trimmed.starts_with("- ")
                || trimmed.starts_with("* ")
                || trimmed.starts_with("• ")
                || lowered.contains("bug")
                || lowered.contains("security")
                || lowered.contains("vulnerab")
                || lowered.contains("error")
                || lowered.contains("warning")
        })
        .take(SUMMARY_MAX_LINES)
        .collect();

    let body = if extracted.len() < SUMMARY_MIN_LINES {
        GENERIC_SUMMARY.to_string()
    } else {
        extracted.join("\n")
    };

    format!("{COMMENT_HEADER}{SUMMARY_PREAMBLE}{body}{COMMENT_FOOTER}")
}

// ─── Posting ──────────────────────────────────────────────────────────────────

/// Format and submit the aggregated review.
///
/// The text is pre-truncated to the local ceiling; if the remote still
/// rejects it as too large, one retry with the shortened summary is made.
/// Any further failure is the caller's terminal `PostFailed` for this cycle.
pub async fn post_review(
    source: &dyn ChangeSource,
    change_number: u64,
    patchset_number: u64,
    fragments: &[Fragment],
    score: i32,
    max_bytes: usize,
) -> Result<(), PostError> {
    let text = truncate_to_bytes(&assemble(fragments), max_bytes);

    match source
        .post_comment(change_number, patchset_number, &text, score)
        .await
    {
        Ok(()) => Ok(()),
        Err(PostError::TooLarge(reason)) => {
            warn!(
                change = change_number,
                reason = %reason,
                "comment rejected as oversize — retrying with shortened summary"
            );
            let summary = truncate_to_bytes(&summarize(&text), max_bytes);
            let result = source
                .post_comment(change_number, patchset_number, &summary, score)
                .await;
            if result.is_ok() {
                info!(change = change_number, "shortened summary posted");
            }
            result
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(path: &str, text: &str) -> Fragment {
        Fragment {
            path: path.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn assembles_header_fragments_and_footer() {
        let comment = assemble(&[
            fragment("a.py", "off-by-one in the loop bound"),
            fragment("b.rs", "missing error propagation"),
        ]);

        assert!(comment.starts_with(COMMENT_HEADER));
        assert!(comment.ends_with(COMMENT_FOOTER));
        assert!(comment.contains("**a.py**\noff-by-one in the loop bound"));
        assert!(comment.contains("**b.rs**\nmissing error propagation"));
        // Fragments are separated by a blank line.
        assert!(comment.contains("loop bound\n\n**b.rs**"));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_bytes("short", 100), "short");
    }

    #[test]
    fn truncation_is_strictly_under_the_limit_and_marked() {
        let long = "x".repeat(500);
        let max = 200;
        let truncated = truncate_to_bytes(&long, max);
        assert!(truncated.len() < max, "byte length {} not under {max}", truncated.len());
        assert!(truncated.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn truncation_never_splits_multibyte_characters() {
        // 4-byte scalar values; most cut points fall inside a character.
        let long = "🤖".repeat(200);
        for max in [100, 101, 102, 103, 150] {
            let truncated = truncate_to_bytes(&long, max);
            assert!(truncated.len() < max);
            // Round-trips through str validity — would panic on a bad cut.
            assert!(truncated.chars().count() > 0);
        }
    }

    #[test]
    fn exactly_at_limit_is_truncated() {
        // The ceiling is exclusive: a comment of exactly max bytes is over.
        let text = "y".repeat(64);
        let truncated = truncate_to_bytes(&text, 64);
        assert!(truncated.len() < 64);
        assert!(truncated.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn summary_extracts_marked_and_keyword_lines() {
        let full = "🤖 **Automated AI Code Review**\n\
                    \n\
                    **a.py**\n\
                    plain context line\n\
                    - potential bug: the cache is never invalidated\n\
                    another plain line\n\
                    This is a security problem with the token handling.\n";
        let summary = summarize(full);
        assert!(summary.contains("**a.py**"));
        assert!(summary.contains("cache is never invalidated"));
        assert!(summary.contains("security problem"));
        assert!(!summary.contains("plain context line"));
        assert!(summary.starts_with(COMMENT_HEADER));
        assert!(summary.contains("shortened summary"));
    }

    #[test]
    fn useless_extraction_falls_back_to_generic_summary() {
        let summary = summarize("nothing here matches\nat all\n");
        assert!(summary.contains(GENERIC_SUMMARY));
    }

    #[test]
    fn summary_line_count_is_capped() {
        let full = (0..100)
            .map(|i| format!("- bug {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = summarize(&full);
        let bullet_lines = summary.lines().filter(|l| l.starts_with("- bug")).count();
        assert_eq!(bullet_lines, SUMMARY_MAX_LINES);
    }
}

// SPDX-License-Identifier: MIT
//! File filter — decides which changed files are worth sending to the reviewer.
//!
//! Pure predicate: extension allow-list minus excluded-directory substrings.
//! Total for any input string, including empty paths and paths without an
//! extension (both rejected).

/// Extensions eligible for review, grouped loosely by category.
const REVIEW_EXTENSIONS: &[&str] = &[
    // Source code
    "py", "java", "js", "ts", "go", "rs", "cpp", "c", "h", "kt", "scala", "rb", "php", "swift",
    "dart",
    // Shell scripts
    "sh", "bash", "zsh", "fish",
    // Config / serialization formats
    "yaml", "yml", "json", "xml", "toml", "cfg", "ini", "conf",
    // Build / container files
    "dockerfile", "containerfile",
    // Docs and the rest
    "sql", "md", "txt",
];

/// Path substrings that disqualify a file regardless of extension.
///
/// Matched case-insensitively against the whole path, so `MyTests/foo.py`
/// and `vendor/Generated/bar.go` are both rejected.
const EXCLUDE_PATTERNS: &[&str] = &[
    "test/",
    "tests/",
    "__pycache__/",
    "node_modules/",
    "vendor/",
    ".git/",
    "build/",
    "dist/",
    "target/",
    "generated/",
    "auto-generated",
];

/// Should this file be sent to the review generator?
///
/// Rejects when the extension is not allow-listed or the path contains any
/// excluded-directory marker. Never panics.
pub fn should_review(path: &str) -> bool {
    let Some(ext) = extension(path) else {
        return false;
    };
    if !REVIEW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return false;
    }

    let lowered = path.to_ascii_lowercase();
    !EXCLUDE_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Extract the extension from the final path component.
///
/// `README` and `.gitignore` both yield `None` — a leading dot is a hidden
/// file marker, not an extension separator.
fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowlisted_source_file() {
        assert!(should_review("src/app.py"));
        assert!(should_review("cmd/server/main.go"));
        assert!(should_review("config/settings.yaml"));
    }

    #[test]
    fn rejects_excluded_directories_even_with_allowed_extension() {
        assert!(!should_review("tests/test_app.py"));
        assert!(!should_review("vendor/lib/app.py"));
        assert!(!should_review("node_modules/left-pad/index.js"));
        assert!(!should_review("target/debug/build.rs"));
    }

    #[test]
    fn exclusion_is_case_insensitive() {
        assert!(!should_review("src/Tests/helper.py"));
        assert!(!should_review("pkg/Auto-Generated/schema.json"));
    }

    #[test]
    fn rejects_missing_or_unlisted_extension() {
        assert!(!should_review("README"));
        assert!(!should_review("bin/app.exe"));
        assert!(!should_review(""));
        assert!(!should_review(".gitignore"));
        assert!(!should_review("Makefile"));
    }

    #[test]
    fn extension_comes_from_final_component() {
        // The directory has a dot but the file itself does not.
        assert!(!should_review("pkg.d/LICENSE"));
        assert!(should_review("pkg.d/notes.md"));
    }
}

// SPDX-License-Identifier: MIT
//! Daemon configuration.
//!
//! Built once at startup and passed by `Arc` to every component — no ambient
//! global lookups past this module. Priority: CLI / env var  >  TOML  >
//! built-in default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_GERRIT_PORT: u16 = 29418;
const DEFAULT_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_MORNING: &str = "09:00";
const DEFAULT_AFTERNOON: &str = "14:00";
const DEFAULT_TRACKING_FILE: &str = "reviewed_changes.txt";

// ─── GerritConfig ─────────────────────────────────────────────────────────────

/// Review-server connection settings (`[gerrit]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GerritConfig {
    /// Gerrit hostname (SSH and REST share it).
    pub host: String,
    /// SSH port (default: 29418).
    pub port: u16,
    /// SSH username.
    pub username: String,
    /// Path to the SSH private key (`~` is expanded).
    pub ssh_key_path: String,
    /// Staleness window appended to the change query as `age:<value>`,
    /// e.g. "2d". None = no age restriction.
    pub query_age: Option<String>,
    /// HTTP credentials for the REST fallbacks (patch download, file
    /// content). None = unauthenticated REST, which many servers reject —
    /// the pipeline then degrades to metadata summaries.
    pub http_username: Option<String>,
    pub http_password: Option<String>,
    /// Timeout for one SSH command invocation (seconds, default: 30).
    pub ssh_timeout_secs: u64,
    /// Timeout for one REST request (seconds, default: 10).
    pub http_timeout_secs: u64,
}

impl Default for GerritConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_GERRIT_PORT,
            username: "reviewd".to_string(),
            ssh_key_path: "~/.ssh/id_rsa".to_string(),
            query_age: None,
            http_username: None,
            http_password: None,
            ssh_timeout_secs: 30,
            http_timeout_secs: 10,
        }
    }
}

// ─── ScheduleConfig ───────────────────────────────────────────────────────────

/// Poll scheduling (`[schedule]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Recurring poll interval in minutes (default: 30).
    pub interval_minutes: u64,
    /// First fixed daily trigger, local time "HH:MM" (default: "09:00").
    pub morning: String,
    /// Second fixed daily trigger, local time "HH:MM" (default: "14:00").
    pub afternoon: String,
    /// Backoff sleep after a failed poll cycle (seconds, default: 300).
    pub error_retry_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            morning: DEFAULT_MORNING.to_string(),
            afternoon: DEFAULT_AFTERNOON.to_string(),
            error_retry_secs: 300,
        }
    }
}

// ─── ReviewConfig ─────────────────────────────────────────────────────────────

/// Review generation settings (`[review]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Binary used to generate reviews (default: "claude", resolved on PATH).
    pub claude_bin: String,
    /// Per-file generation timeout in seconds (default: 60).
    pub timeout_secs: u64,
    /// Delay after each processed change, successful or not (seconds,
    /// default: 2). Keeps the shared backend under its rate budget.
    pub inter_change_delay_secs: u64,
    /// Code-Review score attached to posted comments (default: 0 = none).
    pub score: i32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            claude_bin: "claude".to_string(),
            timeout_secs: 60,
            inter_change_delay_secs: 2,
            score: 0,
        }
    }
}

// ─── LimitsConfig ─────────────────────────────────────────────────────────────

/// Size caps (`[limits]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Skip files whose inserted + deleted line count exceeds this
    /// (default: 5000). Avoids pathological reviews of generated diffs.
    pub max_lines_changed: u64,
    /// Drop full-file context above this many bytes (default: 10000).
    /// Context is optional — never blocks the review.
    pub max_content_bytes: usize,
    /// Hard ceiling on the posted comment, in encoded bytes (default: 16384).
    pub comment_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_lines_changed: 5000,
            max_content_bytes: 10_000,
            comment_max_bytes: 16 * 1024,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,reviewd=trace".
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Tracking-store path (default: `{data_dir}/reviewed_changes.txt`).
    tracking_file: Option<PathBuf>,
    gerrit: Option<GerritConfig>,
    schedule: Option<ScheduleConfig>,
    review: Option<ReviewConfig>,
    limits: Option<LimitsConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── ReviewdConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReviewdConfig {
    pub data_dir: PathBuf,
    pub log: String,
    /// "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
    /// Append-only idempotency ledger location.
    pub tracking_file: PathBuf,
    pub gerrit: GerritConfig,
    pub schedule: ScheduleConfig,
    pub review: ReviewConfig,
    pub limits: LimitsConfig,
}

impl ReviewdConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(data_dir: Option<PathBuf>, log: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let log_format = std::env::var("REVIEWD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let tracking_file = std::env::var("REVIEWD_TRACKING_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or(toml.tracking_file)
            .unwrap_or_else(|| data_dir.join(DEFAULT_TRACKING_FILE));

        let mut gerrit = toml.gerrit.unwrap_or_default();
        apply_gerrit_env(&mut gerrit);
        gerrit.ssh_key_path = expand_tilde(&gerrit.ssh_key_path);

        Self {
            data_dir,
            log,
            log_format,
            tracking_file,
            gerrit,
            schedule: toml.schedule.unwrap_or_default(),
            review: toml.review.unwrap_or_default(),
            limits: toml.limits.unwrap_or_default(),
        }
    }
}

/// Env overrides for the connection settings, so credentials can stay out of
/// config.toml: REVIEWD_GERRIT_HOST / _PORT / _USERNAME / _SSH_KEY /
/// _HTTP_USERNAME / _HTTP_PASSWORD / _QUERY_AGE.
fn apply_gerrit_env(gerrit: &mut GerritConfig) {
    let var = |name: &str| std::env::var(name).ok().filter(|s| !s.is_empty());

    if let Some(host) = var("REVIEWD_GERRIT_HOST") {
        gerrit.host = host;
    }
    if let Some(port) = var("REVIEWD_GERRIT_PORT").and_then(|p| p.parse().ok()) {
        gerrit.port = port;
    }
    if let Some(user) = var("REVIEWD_GERRIT_USERNAME") {
        gerrit.username = user;
    }
    if let Some(key) = var("REVIEWD_GERRIT_SSH_KEY") {
        gerrit.ssh_key_path = key;
    }
    if let Some(age) = var("REVIEWD_GERRIT_QUERY_AGE") {
        gerrit.query_age = Some(age);
    }
    if let Some(user) = var("REVIEWD_GERRIT_HTTP_USERNAME") {
        gerrit.http_username = Some(user);
    }
    if let Some(pass) = var("REVIEWD_GERRIT_HTTP_PASSWORD") {
        gerrit.http_password = Some(pass);
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("reviewd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("reviewd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("reviewd");
        }
    }
    PathBuf::from(".reviewd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ReviewdConfig::new(Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.gerrit.port, 29418);
        assert_eq!(cfg.schedule.interval_minutes, 30);
        assert_eq!(cfg.schedule.morning, "09:00");
        assert_eq!(cfg.limits.max_lines_changed, 5000);
        assert_eq!(cfg.limits.comment_max_bytes, 16 * 1024);
        assert_eq!(cfg.review.timeout_secs, 60);
        assert_eq!(cfg.tracking_file, dir.path().join("reviewed_changes.txt"));
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
log = "debug"

[gerrit]
host = "gerrit.example.com"
username = "bot"
query_age = "2d"

[schedule]
interval_minutes = 10
morning = "08:30"

[limits]
max_lines_changed = 1000
"#,
        )
        .unwrap();

        let cfg = ReviewdConfig::new(Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.log, "debug");
        assert_eq!(cfg.gerrit.host, "gerrit.example.com");
        assert_eq!(cfg.gerrit.username, "bot");
        assert_eq!(cfg.gerrit.query_age.as_deref(), Some("2d"));
        // Unset fields keep their defaults.
        assert_eq!(cfg.gerrit.port, 29418);
        assert_eq!(cfg.schedule.interval_minutes, 10);
        assert_eq!(cfg.schedule.morning, "08:30");
        assert_eq!(cfg.schedule.afternoon, "14:00");
        assert_eq!(cfg.limits.max_lines_changed, 1000);
    }

    #[test]
    fn cli_log_beats_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "log = \"warn\"\n").unwrap();
        let cfg = ReviewdConfig::new(Some(dir.path().to_path_buf()), Some("trace".to_string()));
        assert_eq!(cfg.log, "trace");
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "not valid toml [[[").unwrap();
        let cfg = ReviewdConfig::new(Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.schedule.interval_minutes, 30);
    }
}

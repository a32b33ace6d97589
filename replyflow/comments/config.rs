use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

use crate::model::MAX_REPLY_CHARS;

/// Settings for one dashboard session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardConfig {
    /// Cache freshness.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Reply generation and editing limits.
    #[serde(default)]
    pub replies: ReplySettings,
    /// Structured log output.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Remote API binding; absent when the caller injects its own service.
    #[serde(default)]
    pub api: Option<ApiSettings>,
}

impl DashboardConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading dashboard config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and normalizes a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.normalize()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<()> {
        if self.replies.fanout_limit == 0 {
            self.replies.fanout_limit = default_reply_limit();
        }
        if self.replies.regenerate_limit == 0 {
            self.replies.regenerate_limit = default_reply_limit();
        }
        if self.replies.max_reply_chars == 0 {
            self.replies.max_reply_chars = MAX_REPLY_CHARS;
        }
        self.replies.max_reply_chars = self.replies.max_reply_chars.min(MAX_REPLY_CHARS);
        if self.logging.event_backlog == 0 {
            self.logging.event_backlog = default_event_backlog();
        }
        self.logging.min_level()?;
        if let Some(api) = &self.api {
            if api.base_url.trim().is_empty() {
                bail!("api.base_url cannot be empty");
            }
        }
        Ok(())
    }
}

/// Cache freshness settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Seconds a fetched list is served without refetching.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl CacheSettings {
    /// Freshness window as a duration.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Reply generation and editing limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplySettings {
    /// Suggestions requested per comment during bulk enrichment.
    #[serde(default = "default_reply_limit")]
    pub fanout_limit: usize,
    /// Suggestions requested when regenerating one comment.
    #[serde(default = "default_reply_limit")]
    pub regenerate_limit: usize,
    /// Longest reply accepted by the save path; never above 2200.
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            fanout_limit: default_reply_limit(),
            regenerate_limit: default_reply_limit(),
            max_reply_chars: default_max_reply_chars(),
        }
    }
}

/// Structured log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// JSON-lines file; logging is disabled when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Minimum level (`debug`, `info`, `warn`, `error`).
    #[serde(default = "default_level")]
    pub level: String,
    /// Lifecycle events kept by the session's in-memory bus.
    #[serde(default = "default_event_backlog")]
    pub event_backlog: usize,
}

impl LoggingSettings {
    /// Parsed minimum level.
    pub fn min_level(&self) -> Result<LogLevel> {
        self.level
            .parse::<LogLevel>()
            .with_context(|| format!("invalid logging.level '{}'", self.level))
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            path: None,
            level: default_level(),
            event_backlog: default_event_backlog(),
        }
    }
}

/// HTTP API binding.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Bearer token obtained by the host application.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_stale_after_secs() -> u64 {
    60
}

const fn default_reply_limit() -> usize {
    3
}

const fn default_max_reply_chars() -> usize {
    MAX_REPLY_CHARS
}

const fn default_event_backlog() -> usize {
    256
}

const fn default_timeout_ms() -> u64 {
    4_000
}

fn default_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DashboardConfig::from_toml("").unwrap();
        assert_eq!(config.cache.stale_after(), Duration::from_secs(60));
        assert_eq!(config.replies.fanout_limit, 3);
        assert_eq!(config.replies.regenerate_limit, 3);
        assert_eq!(config.replies.max_reply_chars, 2200);
        assert_eq!(config.logging.min_level().unwrap(), LogLevel::Info);
        assert_eq!(config.logging.event_backlog, 256);
        assert!(config.api.is_none());
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let config = DashboardConfig::from_toml(
            "[replies]\nfanout_limit = 0\nregenerate_limit = 5\n",
        )
        .unwrap();
        assert_eq!(config.replies.fanout_limit, 3);
        assert_eq!(config.replies.regenerate_limit, 5);
    }

    #[test]
    fn reply_length_cannot_exceed_the_platform_limit() {
        let loose = DashboardConfig::from_toml("[replies]\nmax_reply_chars = 5000\n").unwrap();
        assert_eq!(loose.replies.max_reply_chars, MAX_REPLY_CHARS);
        let tight = DashboardConfig::from_toml("[replies]\nmax_reply_chars = 280\n").unwrap();
        assert_eq!(tight.replies.max_reply_chars, 280);
    }

    #[test]
    fn rejects_bad_level_and_blank_url() {
        assert!(DashboardConfig::from_toml("[logging]\nlevel = \"loud\"\n").is_err());
        assert!(DashboardConfig::from_toml("[api]\nbase_url = \" \"\n").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        fs::write(
            &path,
            r#"
[cache]
stale_after_secs = 5

[logging]
path = "logs/comments.log"
level = "warn"

[api]
base_url = "https://api.example.com"
auth_token = "secret"
"#,
        )
        .unwrap();
        let config = DashboardConfig::load(&path).unwrap();
        assert_eq!(config.cache.stale_after_secs, 5);
        assert_eq!(config.logging.min_level().unwrap(), LogLevel::Warn);
        let api = config.api.unwrap();
        assert_eq!(api.timeout_ms, 4_000);
        assert_eq!(api.auth_token.as_deref(), Some("secret"));
    }
}

// crates/core/src/config.rs
//! Tracker configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration. `JOBWATCH_API_URL` and `JOBWATCH_FEED_URL` override
//! the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const API_URL_ENV: &str = "JOBWATCH_API_URL";
pub const FEED_URL_ENV: &str = "JOBWATCH_FEED_URL";

const JOB_ID_PLACEHOLDER: &str = "{job_id}";

/// Configuration for the job tracker and its HTTP / live-feed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the job server REST API.
    pub api_base_url: String,
    /// Base URL of the live feed. Derived from `api_base_url` when unset.
    pub feed_base_url: Option<String>,
    /// Feed path appended to the feed base; must contain `{job_id}`.
    pub feed_path: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// How long a terminal job stays in the active set.
    pub grace_period_ms: u64,
    pub reconnect: ReconnectPolicy,
    /// Per-job cap on stored error details.
    pub max_retained_errors: usize,
}

/// Backoff for reopening a dropped live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed reconnects before giving up. 0 means never give up.
    pub max_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".into(),
            feed_base_url: None,
            feed_path: "/ws/jobs/{job_id}".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            grace_period_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
            max_retained_errors: 1_000,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 20,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether `attempt` (1-based) consecutive failures exhaust the policy.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }

    /// Delay before reconnect `attempt` (1-based): doubles up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl TrackerConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var(FEED_URL_ENV) {
            self.feed_base_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = self.api_base_url.trim();
        if api.is_empty() {
            return Err(ConfigError::Invalid("api_base_url is empty".into()));
        }
        if !(api.starts_with("http://") || api.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be http(s): {api}"
            )));
        }
        if let Some(feed) = &self.feed_base_url {
            if !(feed.starts_with("ws://") || feed.starts_with("wss://")) {
                return Err(ConfigError::Invalid(format!(
                    "feed_base_url must be ws(s): {feed}"
                )));
            }
        }
        if !self.feed_path.contains(JOB_ID_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "feed_path must contain {JOB_ID_PLACEHOLDER}: {}",
                self.feed_path
            )));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.initial_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Feed base URL, derived from the API URL (`http→ws`, `https→wss`).
    pub fn feed_base(&self) -> String {
        if let Some(feed) = &self.feed_base_url {
            return feed.trim_end_matches('/').to_owned();
        }
        let api = self.api_base_url.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            api.to_owned()
        }
    }

    /// Full live-feed URL for one job.
    pub fn feed_url(&self, job_id: &str) -> String {
        format!(
            "{}{}",
            self.feed_base(),
            self.feed_path
                .replace(JOB_ID_PLACEHOLDER, &urlencoding::encode(job_id))
        )
    }
}

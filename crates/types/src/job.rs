// crates/types/src/job.rs
//! Job vocabulary shared by every tracker component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PhaseParseError;

/// Opaque, server-issued job identifier. Stable for the lifetime of a job.
///
/// Servers may hand out either strings or integers; both deserialize into the
/// same textual form so map lookups never depend on the wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawJobId")]
pub struct JobId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(u64),
}

impl From<RawJobId> for JobId {
    fn from(raw: RawJobId) -> Self {
        match raw {
            RawJobId::Text(s) => Self(s),
            RawJobId::Number(n) => Self(n.to_string()),
        }
    }
}

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a job does ("enrich", "price-update", ...). Display only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle phase of a job.
///
/// `Complete`, `Error` and `Cancelled` are terminal: once reached, a job never
/// transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the status strings the job server is known to emit.
impl FromStr for JobPhase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Ok(Self::Pending),
            "running" | "in_progress" | "started" => Ok(Self::Running),
            "complete" | "completed" | "success" | "succeeded" | "done" => Ok(Self::Complete),
            "error" | "failed" | "failure" => Ok(Self::Error),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(PhaseParseError(s.to_owned())),
        }
    }
}

/// Progress counters for a job.
///
/// Construct through [`ProgressCounters::new`] so `current <= total` (when
/// `total > 0`) and `percentage` in `[0, 100]` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
}

impl ProgressCounters {
    /// Normalise raw counters. A missing or non-finite `percentage` is
    /// recomputed from `current / total`.
    pub fn new(current: u64, total: u64, percentage: Option<f64>) -> Self {
        let current = if total > 0 { current.min(total) } else { current };
        let computed = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let percentage = match percentage {
            Some(p) if p.is_finite() => p.clamp(0.0, 100.0),
            _ => computed,
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

/// A per-item failure reported by the server while a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(alias = "card_name", default)]
    pub item_label: String,
    #[serde(default)]
    pub message: String,
}

impl JobError {
    pub fn new(item_label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_label: item_label.into(),
            message: message.into(),
        }
    }
}

/// Phase-specific detail attached once a job is terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSummary(pub serde_json::Value);

impl JobSummary {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Outcome the server declared inside the summary payload, if any.
    pub fn declared_phase(&self) -> Option<JobPhase> {
        self.get("status")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

// crates/types/src/wire.rs
//! Shapes exchanged with the job server: REST payloads and live-feed frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedDecodeError;
use crate::job::{JobError, JobId, JobKind, JobPhase, JobSummary, ProgressCounters};
use crate::timestamp;

/// `POST /jobs/{kind}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub job_id: JobId,
}

/// `POST /jobs/{id}/cancel` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Point-in-time job snapshot from `GET /jobs` and `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub status: String,
    #[serde(default)]
    pub progress: Option<SnapshotProgress>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub job_type: Option<JobKind>,
}

/// Progress block of a [`JobStatus`]. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotProgress {
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub errors: Vec<JobError>,
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

impl JobStatus {
    /// Parsed phase, or `None` for a status string the tracker does not know.
    pub fn phase(&self) -> Option<JobPhase> {
        self.status.parse().ok()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_time.as_deref().and_then(timestamp::parse_timestamp)
    }

    /// Counters reported by the snapshot, filling gaps from `fallback`.
    ///
    /// Returns `None` when the snapshot carries no counters at all, so callers
    /// can keep their last known value instead of resetting to zero.
    pub fn counters(&self, fallback: ProgressCounters) -> Option<ProgressCounters> {
        let progress = self.progress.as_ref()?;
        if progress.current.is_none() && progress.total.is_none() && progress.percentage.is_none()
        {
            return None;
        }
        let current = progress.current.unwrap_or(fallback.current);
        let total = progress.total.unwrap_or(fallback.total);
        Some(ProgressCounters::new(current, total, progress.percentage))
    }

    pub fn errors(&self) -> &[JobError] {
        self.progress
            .as_ref()
            .map(|p| p.errors.as_slice())
            .unwrap_or(&[])
    }

    pub fn summary(&self) -> Option<JobSummary> {
        self.progress
            .as_ref()
            .and_then(|p| p.summary.clone())
            .map(JobSummary)
    }
}

/// One finished job from `GET /jobs/history`. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub job_id: JobId,
    #[serde(alias = "job_type")]
    pub kind: JobKind,
    #[serde(
        default,
        alias = "start_time",
        deserialize_with = "timestamp::deserialize_lenient"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "status", deserialize_with = "deserialize_phase")]
    pub phase: JobPhase,
}

fn deserialize_phase<'de, D>(deserializer: D) -> Result<JobPhase, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// A frame from the per-job live feed, disambiguated by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Progress {
        #[serde(default)]
        current: u64,
        #[serde(default)]
        total: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percentage: Option<f64>,
        /// Transport sequence number, when the server provides one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Error {
        #[serde(rename = "card_name", default)]
        item_label: String,
        #[serde(default)]
        message: String,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default)]
        summary: serde_json::Value,
    },
}

const KNOWN_TAGS: &[&str] = &["progress", "error", "complete"];

impl FeedEvent {
    /// Decode one text frame. Unknown tags are reported distinctly from
    /// malformed payloads so the transport can log and skip them.
    pub fn decode(text: &str) -> Result<Self, FeedDecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FeedDecodeError::Malformed(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(FeedDecodeError::MissingType)?;
        if !KNOWN_TAGS.contains(&tag) {
            return Err(FeedDecodeError::UnknownType(tag.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| FeedDecodeError::Malformed(e.to_string()))
    }

    /// Terminal phase declared by a `complete` frame.
    pub fn terminal_phase(&self) -> Option<JobPhase> {
        match self {
            Self::Complete { status, summary } => {
                Some(Self::completion_phase(status.as_deref(), summary))
            }
            _ => None,
        }
    }

    /// Reads the frame's `status`, then `summary.status`; anything missing,
    /// unknown or non-terminal counts as a successful completion.
    pub fn completion_phase(status: Option<&str>, summary: &serde_json::Value) -> JobPhase {
        let declared = status
            .and_then(|s| s.parse::<JobPhase>().ok())
            .or_else(|| {
                summary
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            });
        match declared {
            Some(phase) if phase.is_terminal() => phase,
            _ => JobPhase::Complete,
        }
    }
}

// crates/types/src/state.rs
//! Merged per-job state published to observers.

use serde::{Deserialize, Serialize};

use crate::job::{JobError, JobPhase, JobSummary, ProgressCounters};

/// State of the live-feed transport only. Says nothing about job progress:
/// a job can be `complete` while its transport is `disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

/// Authoritative view of one job, merged from pull snapshots and live events.
///
/// Observers always receive copies; the progress channel is the only writer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub connection_status: ConnectionStatus,
    pub progress: ProgressCounters,
    /// Append-only, in arrival order.
    pub errors: Vec<JobError>,
    /// Errors received after the retention cap was reached.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors_dropped: u64,
    pub phase: JobPhase,
    /// Present if and only if `phase` is terminal.
    pub summary: Option<JobSummary>,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

// crates/types/src/lib.rs
//! Shared data model for the jobwatch tracker.
//!
//! Holds the job vocabulary (`JobId`, `JobPhase`, counters, errors,
//! summaries), the merged per-job `ChannelState` observers receive, and the
//! wire shapes exchanged with the job server.

pub mod error;
pub mod job;
pub mod state;
pub mod timestamp;
pub mod wire;

pub use error::{FeedDecodeError, PhaseParseError};
pub use job::{JobError, JobId, JobKind, JobPhase, JobSummary, ProgressCounters};
pub use state::{ChannelState, ConnectionStatus};
pub use wire::{
    CancelResponse, FeedEvent, HistoryEntry, JobStatus, SnapshotProgress, StartJobResponse,
};

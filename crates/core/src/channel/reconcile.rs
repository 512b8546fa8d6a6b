// crates/core/src/channel/reconcile.rs
//! Pure merge rules for one job's `ChannelState`.
//!
//! Two sources feed a job's state: the pull snapshot fetched at the start of
//! every (re)connect, and live feed events. The rules:
//!
//! - Each connect cycle opens a handshake. Until the handshake's pull
//!   resolves, progress keeps its last known value.
//! - Within a handshake, whichever of {pull result, live event} arrives last
//!   sets the baseline. After the pull resolves only live events apply.
//! - A failed pull is absorbed: the handshake settles and live events carry on.
//! - A terminal phase from either source is final. Everything after it,
//!   including a queued pull response, is dropped.

use tracing::{debug, trace, warn};

use jobwatch_types::{
    ChannelState, ConnectionStatus, FeedEvent, JobError, JobId, JobPhase, JobStatus, JobSummary,
    ProgressCounters,
};

use crate::error::ApiError;

/// Effect of applying one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    Updated,
    /// The job just became terminal. Reported exactly once per job.
    Terminal(JobPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    /// No connect cycle started yet.
    Idle,
    AwaitingPull,
    Settled,
}

pub(crate) struct Reconciler {
    job_id: JobId,
    state: ChannelState,
    handshake: Handshake,
    last_seq: Option<u64>,
    max_errors: usize,
}

impl Reconciler {
    pub(crate) fn new(job_id: JobId, max_errors: usize) -> Self {
        Self {
            job_id,
            state: ChannelState::default(),
            handshake: Handshake::Idle,
            last_seq: None,
            max_errors,
        }
    }

    pub(crate) fn state(&self) -> &ChannelState {
        &self.state
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Start a connect cycle. Progress is left untouched so a reconnect never
    /// exposes a reset to zero.
    pub(crate) fn begin_handshake(&mut self) {
        self.handshake = Handshake::AwaitingPull;
        // Sequence numbers are per connection.
        self.last_seq = None;
        self.state.connection_status = ConnectionStatus::Connecting;
    }

    pub(crate) fn set_connection(&mut self, status: ConnectionStatus) -> Transition {
        if self.state.connection_status == status {
            return Transition::Unchanged;
        }
        self.state.connection_status = status;
        Transition::Updated
    }

    /// Apply the handshake's pull result.
    pub(crate) fn apply_snapshot(&mut self, snapshot: Result<JobStatus, ApiError>) -> Transition {
        if self.handshake != Handshake::AwaitingPull {
            debug!(job_id = %self.job_id, "snapshot outside handshake ignored");
            return Transition::Unchanged;
        }
        self.handshake = Handshake::Settled;

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "snapshot fetch failed; relying on live feed");
                return Transition::Unchanged;
            }
        };
        if self.is_terminal() {
            debug!(job_id = %self.job_id, "snapshot after terminal phase dropped");
            return Transition::Unchanged;
        }

        let before = self.state.clone();
        if let Some(counters) = snapshot.counters(self.state.progress) {
            self.state.progress = counters;
        }
        let already_seen = self.state.errors.len() + self.state.errors_dropped as usize;
        for error in snapshot.errors().iter().skip(already_seen) {
            self.push_error(error.clone());
        }

        match snapshot.phase() {
            Some(phase) if phase.is_terminal() => {
                let summary = snapshot.summary().unwrap_or_default();
                return self.finish(phase, summary);
            }
            Some(phase) => self.state.phase = phase,
            None => {
                warn!(job_id = %self.job_id, status = %snapshot.status, "unknown job status in snapshot");
            }
        }

        if self.state == before {
            Transition::Unchanged
        } else {
            Transition::Updated
        }
    }

    /// Apply one live feed event.
    pub(crate) fn apply_event(&mut self, event: FeedEvent) -> Transition {
        if self.is_terminal() {
            trace!(job_id = %self.job_id, "event after terminal phase dropped");
            return Transition::Unchanged;
        }
        match event {
            FeedEvent::Progress {
                current,
                total,
                percentage,
                seq,
            } => {
                if let Some(seq) = seq {
                    if self.last_seq.is_some_and(|last| seq <= last) {
                        debug!(job_id = %self.job_id, seq, "out-of-order progress event dropped");
                        return Transition::Unchanged;
                    }
                    self.last_seq = Some(seq);
                }
                let before = self.state.clone();
                self.state.progress = ProgressCounters::new(current, total, percentage);
                if self.state.phase == JobPhase::Pending {
                    self.state.phase = JobPhase::Running;
                }
                if self.state == before {
                    Transition::Unchanged
                } else {
                    Transition::Updated
                }
            }
            FeedEvent::Error {
                item_label,
                message,
            } => {
                self.push_error(JobError::new(item_label, message));
                Transition::Updated
            }
            FeedEvent::Complete { status, summary } => {
                let phase = FeedEvent::completion_phase(status.as_deref(), &summary);
                self.finish(phase, JobSummary(summary))
            }
        }
    }

    fn finish(&mut self, phase: JobPhase, summary: JobSummary) -> Transition {
        self.state.phase = phase;
        self.state.summary = Some(summary);
        self.handshake = Handshake::Settled;
        Transition::Terminal(phase)
    }

    fn push_error(&mut self, error: JobError) {
        if self.state.errors.len() < self.max_errors {
            self.state.errors.push(error);
        } else {
            self.state.errors_dropped += 1;
        }
    }
}

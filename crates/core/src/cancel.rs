// crates/core/src/cancel.rs
//! At-most-once cancellation requests.
//!
//! The controller only talks to the server. Whether a cancel took effect is
//! observed through the job's `ProgressChannel` reaching `cancelled`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use jobwatch_types::{CancelResponse, JobId};

use crate::api::JobApi;
use crate::channel::ProgressChannel;
use crate::error::CancelError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The server accepted the request.
    Requested(CancelResponse),
    /// A request for this job is in flight or was already accepted.
    AlreadyRequested,
    /// The job already reached a terminal phase.
    AlreadyTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelMark {
    Requested,
    /// Job is terminal; cancelling is moot.
    Settled,
}

#[derive(Clone)]
pub struct CancellationController {
    api: Arc<dyn JobApi>,
    channel: ProgressChannel,
    marks: Arc<Mutex<HashMap<JobId, CancelMark>>>,
}

impl CancellationController {
    pub fn new(api: Arc<dyn JobApi>, channel: ProgressChannel) -> Self {
        Self {
            api,
            channel,
            marks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn marks(&self) -> MutexGuard<'_, HashMap<JobId, CancelMark>> {
        self.marks.lock().unwrap_or_else(|poisoned| {
            error!("cancel mark table poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Ask the server to cancel `job_id`, unless a request is already
    /// outstanding or the job is known to be terminal.
    ///
    /// On failure the mark is cleared so the caller may retry.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome, CancelError> {
        let terminal = self
            .channel
            .peek(job_id)
            .is_some_and(|state| state.is_terminal());
        {
            let mut marks = self.marks();
            match marks.get(job_id) {
                Some(CancelMark::Settled) => return Ok(CancelOutcome::AlreadyTerminal),
                Some(CancelMark::Requested) => {
                    debug!(%job_id, "cancel already requested");
                    return Ok(CancelOutcome::AlreadyRequested);
                }
                None if terminal => {
                    marks.insert(job_id.clone(), CancelMark::Settled);
                    return Ok(CancelOutcome::AlreadyTerminal);
                }
                None => {
                    marks.insert(job_id.clone(), CancelMark::Requested);
                }
            }
        }

        let mut pending = PendingMark {
            marks: &self.marks,
            job_id,
            accepted: false,
        };
        info!(%job_id, "requesting cancellation");
        match self.api.cancel_job(job_id).await {
            Ok(response) => {
                pending.accepted = true;
                debug!(%job_id, status = %response.status, "cancel accepted");
                Ok(CancelOutcome::Requested(response))
            }
            Err(source) => {
                warn!(%job_id, error = %source, "cancel request failed");
                Err(CancelError {
                    job_id: job_id.to_string(),
                    source,
                })
            }
        }
    }

    /// The job reached a terminal phase: further cancels are no-ops.
    pub fn on_terminal(&self, job_id: &JobId) {
        self.marks().insert(job_id.clone(), CancelMark::Settled);
    }

    /// Drop all bookkeeping for a job that left the active set.
    pub fn forget(&self, job_id: &JobId) {
        self.marks().remove(job_id);
    }

    pub fn is_cancel_requested(&self, job_id: &JobId) -> bool {
        self.marks().get(job_id) == Some(&CancelMark::Requested)
    }
}

/// Clears a `Requested` mark unless the server accepted the request, so a
/// failed or abandoned request leaves the job open to a retry.
struct PendingMark<'a> {
    marks: &'a Mutex<HashMap<JobId, CancelMark>>,
    job_id: &'a JobId,
    accepted: bool,
}

impl Drop for PendingMark<'_> {
    fn drop(&mut self) {
        if self.accepted {
            return;
        }
        let mut marks = self.marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A terminal notice may have landed while the request was out.
        if marks.get(self.job_id) == Some(&CancelMark::Requested) {
            marks.remove(self.job_id);
            debug!(job_id = %self.job_id, "cancel mark cleared");
        }
    }
}

// crates/core/src/channel/driver.rs
//! Per-job task owning the single live subscription for that job.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use jobwatch_types::{ChannelState, ConnectionStatus, FeedEvent, JobId, JobStatus};

use super::reconcile::{Reconciler, Transition};
use super::TerminalNotice;
use crate::api::JobApi;
use crate::config::ReconnectPolicy;
use crate::error::ApiError;
use crate::feed::FeedConnector;

/// Runs connect cycles for one job until it is terminal, the reconnect
/// policy is exhausted, or the task is aborted by the last observer leaving.
pub(super) struct Driver {
    pub(super) job_id: JobId,
    pub(super) api: Arc<dyn JobApi>,
    pub(super) feed: Arc<dyn FeedConnector>,
    pub(super) policy: ReconnectPolicy,
    pub(super) reconciler: Reconciler,
    pub(super) state_tx: watch::Sender<ChannelState>,
    pub(super) terminal_tx: broadcast::Sender<TerminalNotice>,
}

impl Driver {
    pub(super) async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            self.reconciler.begin_handshake();
            self.publish();

            let delivered = self.connect_cycle().await;
            if self.reconciler.is_terminal() {
                self.apply_connection(ConnectionStatus::Disconnected);
                debug!(job_id = %self.job_id, "job terminal; live feed closed");
                return;
            }

            // A feed that opens and closes without delivering anything counts
            // as a failed attempt, so backoff and the attempt limit still apply.
            failures = if delivered { 1 } else { failures + 1 };
            self.apply_connection(ConnectionStatus::Disconnected);
            if self.policy.exhausted(failures) {
                warn!(
                    job_id = %self.job_id,
                    attempts = failures - 1,
                    "giving up on live feed; state frozen at last known value"
                );
                return;
            }
            let delay = self.policy.delay_for(failures);
            info!(
                job_id = %self.job_id,
                attempt = failures,
                backoff_ms = delay.as_millis() as u64,
                "live feed dropped; reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One handshake: pull snapshot and open the feed concurrently, then
    /// stream events until the feed drops or the job turns terminal.
    ///
    /// Returns whether the feed delivered at least one event.
    async fn connect_cycle(&mut self) -> bool {
        let api = Arc::clone(&self.api);
        let job_id = self.job_id.clone();
        let pull = async move { api.get_job(&job_id).await };
        tokio::pin!(pull);
        let mut pull_pending = true;

        let feed = Arc::clone(&self.feed);
        let job_id = self.job_id.clone();
        let connect = async move { feed.connect(&job_id).await };
        tokio::pin!(connect);

        let opened = loop {
            tokio::select! {
                snapshot = &mut pull, if pull_pending => {
                    pull_pending = false;
                    self.on_snapshot(snapshot);
                }
                opened = &mut connect => break opened,
            }
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "live feed connect failed");
                if pull_pending {
                    // The snapshot may reveal the job finished while we were away.
                    self.on_snapshot(pull.await);
                }
                return false;
            }
        };
        if self.reconciler.is_terminal() {
            return false;
        }
        self.apply_connection(ConnectionStatus::Connected);

        let mut delivered = false;
        loop {
            tokio::select! {
                snapshot = &mut pull, if pull_pending => {
                    pull_pending = false;
                    self.on_snapshot(snapshot);
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        delivered = true;
                        self.on_event(event);
                    }
                    Some(Err(e)) => {
                        warn!(job_id = %self.job_id, error = %e, "live feed transport error");
                        break;
                    }
                    None => {
                        debug!(job_id = %self.job_id, "live feed closed by server");
                        break;
                    }
                },
            }
            if self.reconciler.is_terminal() {
                return delivered;
            }
        }

        if pull_pending {
            self.on_snapshot(pull.await);
        }
        delivered
    }

    fn on_snapshot(&mut self, snapshot: Result<JobStatus, ApiError>) {
        let transition = self.reconciler.apply_snapshot(snapshot);
        self.after(transition);
    }

    fn on_event(&mut self, event: FeedEvent) {
        let transition = self.reconciler.apply_event(event);
        self.after(transition);
    }

    fn apply_connection(&mut self, status: ConnectionStatus) {
        let transition = self.reconciler.set_connection(status);
        self.after(transition);
    }

    fn after(&mut self, transition: Transition) {
        match transition {
            Transition::Unchanged => {}
            Transition::Updated => self.publish(),
            Transition::Terminal(phase) => {
                self.publish();
                info!(job_id = %self.job_id, %phase, "job reached terminal phase");
                // No receivers is fine.
                let _ = self.terminal_tx.send(TerminalNotice {
                    job_id: self.job_id.clone(),
                    phase,
                });
            }
        }
    }

    fn publish(&self) {
        let next = self.reconciler.state();
        self.state_tx.send_if_modified(|current| {
            if current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }
}

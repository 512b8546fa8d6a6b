// crates/core/src/tracker.rs
//! Wires the job-tracking components together.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobwatch_types::{JobId, JobKind};

use crate::api::{HttpJobApi, JobApi};
use crate::cancel::CancellationController;
use crate::channel::{ProgressChannel, TerminalNotice};
use crate::config::TrackerConfig;
use crate::error::ApiError;
use crate::feed::{FeedConnector, WsFeedConnector};
use crate::history::HistoryCache;
use crate::registry::{JobRegistry, RegistryEvent};

/// Owns one of each component and routes terminal notices between them.
///
/// Must be created inside a Tokio runtime. Dropping the tracker stops the
/// routing task; live feeds close as their subscriptions are dropped.
pub struct JobTracker {
    api: Arc<dyn JobApi>,
    channel: ProgressChannel,
    registry: JobRegistry,
    cancel: CancellationController,
    history: HistoryCache,
    router: JoinHandle<()>,
}

impl JobTracker {
    /// Tracker backed by the HTTP API and WebSocket feed from `config`.
    pub fn new(config: &TrackerConfig) -> Result<Self, ApiError> {
        let api: Arc<dyn JobApi> = Arc::new(HttpJobApi::new(config)?);
        let feed: Arc<dyn FeedConnector> = Arc::new(WsFeedConnector::new(config));
        Ok(Self::with_backends(api, feed, config))
    }

    pub fn with_backends(
        api: Arc<dyn JobApi>,
        feed: Arc<dyn FeedConnector>,
        config: &TrackerConfig,
    ) -> Self {
        let channel = ProgressChannel::new(Arc::clone(&api), feed, config);
        let registry = JobRegistry::new(Arc::clone(&api), config.grace_period());
        let cancel = CancellationController::new(Arc::clone(&api), channel.clone());
        let history = HistoryCache::new(Arc::clone(&api));
        // Subscribe before spawning so no early notice is missed.
        let router = tokio::spawn(route(
            channel.subscribe_terminal(),
            registry.subscribe(),
            channel.clone(),
            registry.clone(),
            cancel.clone(),
        ));
        Self {
            api,
            channel,
            registry,
            cancel,
            history,
            router,
        }
    }

    /// Trigger a job on the server and start tracking it.
    pub async fn start(
        &self,
        kind: JobKind,
        params: serde_json::Value,
    ) -> Result<JobId, ApiError> {
        let job_id = self.api.start_job(&kind, params).await?;
        info!(%job_id, %kind, "job started");
        self.registry.add(job_id.clone(), kind);
        Ok(job_id)
    }

    /// Direct server access for one-off queries.
    pub fn api(&self) -> &Arc<dyn JobApi> {
        &self.api
    }

    pub fn channel(&self) -> &ProgressChannel {
        &self.channel
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn cancellation(&self) -> &CancellationController {
        &self.cancel
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// Terminal notices schedule registry removal and settle cancel marks;
/// registry removals drop the job's cancel bookkeeping.
async fn route(
    mut terminal: broadcast::Receiver<TerminalNotice>,
    mut membership: broadcast::Receiver<RegistryEvent>,
    channel: ProgressChannel,
    registry: JobRegistry,
    cancel: CancellationController,
) {
    loop {
        tokio::select! {
            notice = terminal.recv() => match notice {
                Ok(notice) => {
                    debug!(job_id = %notice.job_id, phase = %notice.phase, "routing terminal notice");
                    cancel.on_terminal(&notice.job_id);
                    registry.on_terminal(&notice.job_id);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "terminal notices lagged; sweeping open channels");
                    sweep_terminal(&channel, &registry, &cancel);
                }
                Err(RecvError::Closed) => return,
            },
            event = membership.recv() => match event {
                Ok(RegistryEvent::Removed(job_id)) => cancel.forget(&job_id),
                Ok(RegistryEvent::Added(_)) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "registry events lagged");
                }
                Err(RecvError::Closed) => return,
            },
        }
    }
}

/// Catch up on terminal transitions missed by a lagging receiver.
fn sweep_terminal(channel: &ProgressChannel, registry: &JobRegistry, cancel: &CancellationController) {
    for job_id in channel.open_channels() {
        if channel.peek(&job_id).is_some_and(|state| state.is_terminal()) {
            cancel.on_terminal(&job_id);
            registry.on_terminal(&job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelOutcome;
    use crate::test_support::{FakeApi, FakeFeed};
    use jobwatch_types::{ConnectionStatus, FeedEvent, JobPhase, JobSummary, ProgressCounters};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn tracker() -> (JobTracker, Arc<FakeApi>, Arc<FakeFeed>) {
        let api = FakeApi::new();
        let feed = FakeFeed::new();
        let tracker = JobTracker::with_backends(api.clone(), feed.clone(), &TrackerConfig::default());
        (tracker, api, feed)
    }

    async fn settle() {
        for _ in 0..30 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggered_job_lifecycle() {
        let (tracker, api, feed) = tracker();
        let job = tracker
            .start(JobKind::from("price-update"), serde_json::json!({"set": "LEA"}))
            .await
            .unwrap();
        assert_eq!(api.started()[0].0, JobKind::from("price-update"));
        assert_eq!(tracker.registry().active().len(), 1);
        api.set_job(&job, "pending", 0, 0);

        let (_, sub) = tracker.channel().observe(&job);
        settle().await;
        feed.push(
            &job,
            FeedEvent::Progress {
                current: 3,
                total: 10,
                percentage: Some(30.0),
                seq: None,
            },
        );
        settle().await;
        assert_eq!(sub.current().progress, ProgressCounters::new(3, 10, Some(30.0)));

        feed.push(
            &job,
            FeedEvent::Complete {
                status: None,
                summary: serde_json::json!({"processed": 10, "errors": 0}),
            },
        );
        settle().await;
        let state = sub.current();
        assert_eq!(state.phase, JobPhase::Complete);
        assert_eq!(
            state.summary,
            Some(JobSummary(serde_json::json!({"processed": 10, "errors": 0})))
        );
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);

        // Still visible during the grace period.
        tokio::time::advance(Duration::from_millis(4_900)).await;
        settle().await;
        assert!(tracker.registry().contains(&job));

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert!(!tracker.registry().contains(&job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_observers_one_removal() {
        let (tracker, api, feed) = tracker();
        let job = JobId::from("J1");
        tracker.registry().add(job.clone(), JobKind::from("enrich"));
        api.set_job(&job, "running", 1, 2);
        let mut events = tracker.registry().subscribe();

        let subs: Vec<_> = (0..4).map(|_| tracker.channel().observe(&job).1).collect();
        settle().await;
        assert_eq!(feed.connect_count(&job), 1);
        feed.push(
            &job,
            FeedEvent::Complete {
                status: Some("error".into()),
                summary: serde_json::json!({"reason": "upstream 503"}),
            },
        );
        settle().await;
        for sub in &subs {
            assert_eq!(sub.current().phase, JobPhase::Error);
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(events.try_recv().unwrap(), RegistryEvent::Removed(job.clone()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_observed_through_channel() {
        let (tracker, api, feed) = tracker();
        let job = JobId::from("J1");
        tracker.registry().add(job.clone(), JobKind::from("catalog-sync"));
        api.set_job(&job, "running", 4, 10);
        let (_, sub) = tracker.channel().observe(&job);
        settle().await;

        let outcome = tracker.cancellation().cancel(&job).await.unwrap();
        assert!(matches!(outcome, CancelOutcome::Requested(_)));
        assert_eq!(sub.current().phase, JobPhase::Running);

        feed.push(
            &job,
            FeedEvent::Complete {
                status: Some("cancelled".into()),
                summary: serde_json::json!({}),
            },
        );
        settle().await;
        assert_eq!(sub.current().phase, JobPhase::Cancelled);
        assert!(!tracker.cancellation().is_cancel_requested(&job));
        assert_eq!(
            tracker.cancellation().cancel(&job).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(api.cancel_count(&job), 1);

        // Removal from the active set clears the cancel bookkeeping.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(!tracker.registry().contains(&job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_cancel_response_after_terminal_event() {
        let (tracker, api, feed) = tracker();
        let job = JobId::from("J1");
        tracker.registry().add(job.clone(), JobKind::from("catalog-sync"));
        api.set_job(&job, "running", 6, 10);
        let (_, sub) = tracker.channel().observe(&job);
        settle().await;

        api.hold_cancels(true);
        let request = tokio::spawn({
            let cancellation = tracker.cancellation().clone();
            let job = job.clone();
            async move { cancellation.cancel(&job).await }
        });
        settle().await;
        assert!(tracker.cancellation().is_cancel_requested(&job));

        feed.push(
            &job,
            FeedEvent::Complete {
                status: Some("cancelled".into()),
                summary: serde_json::json!({"processed": 6}),
            },
        );
        settle().await;
        assert_eq!(sub.current().phase, JobPhase::Cancelled);

        api.hold_cancels(false);
        assert!(matches!(
            request.await.unwrap().unwrap(),
            CancelOutcome::Requested(_)
        ));
        settle().await;

        let state = sub.current();
        assert_eq!(state.phase, JobPhase::Cancelled);
        assert_eq!(state.progress.current, 6);
        assert!(!tracker.cancellation().is_cancel_requested(&job));
        assert_eq!(
            tracker.cancellation().cancel(&job).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(api.cancel_count(&job), 1);
    }

    #[tokio::test]
    async fn test_restore_then_observe() {
        let (tracker, api, _feed) = tracker();
        let a = JobId::from("a");
        api.set_list(Some(vec![
            crate::test_support::job_status(&a, "running", 2, 8),
            crate::test_support::job_status(&JobId::from("b"), "completed", 8, 8),
        ]));
        api.set_job(&a, "running", 2, 8);

        assert_eq!(tracker.registry().restore().await, 1);
        let record = &tracker.registry().active()[0];
        let (_, sub) = tracker.channel().observe(&record.job_id);
        settle().await;
        assert_eq!(sub.current().progress.current, 2);
    }
}

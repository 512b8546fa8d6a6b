// crates/core/src/test_support.rs
//! Scriptable `JobApi` / `FeedConnector` doubles for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use jobwatch_types::{
    CancelResponse, FeedEvent, HistoryEntry, JobId, JobKind, JobStatus, SnapshotProgress,
};

use crate::api::JobApi;
use crate::error::{ApiError, FeedError};
use crate::feed::{FeedConnector, FeedStream};

pub(crate) fn job_status(job_id: &JobId, status: &str, current: u64, total: u64) -> JobStatus {
    JobStatus {
        job_id: job_id.clone(),
        status: status.to_owned(),
        progress: Some(SnapshotProgress {
            current: Some(current),
            total: Some(total),
            ..SnapshotProgress::default()
        }),
        start_time: None,
        job_type: None,
    }
}

pub(crate) fn server_error(path: &str) -> ApiError {
    ApiError::HttpStatus {
        url: format!("http://fake{path}"),
        status: 500,
        body: "boom".into(),
    }
}

#[derive(Clone)]
enum Pull {
    Ready(JobStatus),
    Fail,
    Held,
}

#[derive(Default)]
struct ApiState {
    pulls: HashMap<JobId, Pull>,
    gets: HashMap<JobId, usize>,
    list: Option<Vec<JobStatus>>,
    list_calls: usize,
    cancels: HashMap<JobId, usize>,
    cancel_fails: bool,
    cancel_held: bool,
    history: Option<Vec<HistoryEntry>>,
    history_calls: usize,
    history_held: bool,
    started: Vec<(JobKind, serde_json::Value)>,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<ApiState>,
    released: Notify,
}

impl FakeApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut ApiState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn set_job(&self, job_id: &JobId, status: &str, current: u64, total: u64) {
        let pull = Pull::Ready(job_status(job_id, status, current, total));
        self.with(|s| s.pulls.insert(job_id.clone(), pull));
    }

    pub(crate) fn fail_pulls(&self, job_id: &JobId) {
        self.with(|s| s.pulls.insert(job_id.clone(), Pull::Fail));
    }

    /// Park every `get_job` for `job_id` until `release_pull`.
    pub(crate) fn hold_pulls(&self, job_id: &JobId) {
        self.with(|s| s.pulls.insert(job_id.clone(), Pull::Held));
    }

    pub(crate) fn release_pull(&self, job_id: &JobId, status: &str, current: u64, total: u64) {
        self.set_job(job_id, status, current, total);
        self.released.notify_waiters();
    }

    pub(crate) fn get_count(&self, job_id: &JobId) -> usize {
        self.with(|s| s.gets.get(job_id).copied().unwrap_or(0))
    }

    pub(crate) fn set_list(&self, jobs: Option<Vec<JobStatus>>) {
        self.with(|s| s.list = jobs);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.with(|s| s.list_calls)
    }

    pub(crate) fn cancel_count(&self, job_id: &JobId) -> usize {
        self.with(|s| s.cancels.get(job_id).copied().unwrap_or(0))
    }

    pub(crate) fn fail_cancels(&self, fail: bool) {
        self.with(|s| s.cancel_fails = fail);
    }

    pub(crate) fn hold_cancels(&self, held: bool) {
        self.with(|s| s.cancel_held = held);
        if !held {
            self.released.notify_waiters();
        }
    }

    pub(crate) fn set_history(&self, entries: Option<Vec<HistoryEntry>>) {
        self.with(|s| s.history = entries);
    }

    pub(crate) fn hold_history(&self, held: bool) {
        self.with(|s| s.history_held = held);
        if !held {
            self.released.notify_waiters();
        }
    }

    pub(crate) fn history_calls(&self) -> usize {
        self.with(|s| s.history_calls)
    }

    pub(crate) fn started(&self) -> Vec<(JobKind, serde_json::Value)> {
        self.with(|s| s.started.clone())
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ApiError> {
        self.with(|s| *s.gets.entry(job_id.clone()).or_default() += 1);
        loop {
            // Registered before the state check so a release in between is not missed.
            let released = self.released.notified();
            let pull = self.with(|s| s.pulls.get(job_id).cloned());
            match pull {
                Some(Pull::Ready(status)) => return Ok(status),
                Some(Pull::Held) => released.await,
                Some(Pull::Fail) | None => return Err(server_error("/jobs/x")),
            }
        }
    }

    async fn list_jobs(&self) -> Result<Vec<JobStatus>, ApiError> {
        self.with(|s| {
            s.list_calls += 1;
            s.list.clone().ok_or_else(|| server_error("/jobs"))
        })
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, ApiError> {
        self.with(|s| *s.cancels.entry(job_id.clone()).or_default() += 1);
        loop {
            let released = self.released.notified();
            let (held, fails) = self.with(|s| (s.cancel_held, s.cancel_fails));
            if held {
                released.await;
                continue;
            }
            if fails {
                return Err(server_error("/jobs/x/cancel"));
            }
            return Ok(CancelResponse {
                job_id: job_id.clone(),
                status: "cancelling".into(),
                message: None,
            });
        }
    }

    async fn list_history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        self.with(|s| s.history_calls += 1);
        loop {
            let released = self.released.notified();
            let (held, history) = self.with(|s| (s.history_held, s.history.clone()));
            if held {
                released.await;
                continue;
            }
            return history.ok_or_else(|| server_error("/jobs/history"));
        }
    }

    async fn start_job(
        &self,
        kind: &JobKind,
        params: serde_json::Value,
    ) -> Result<JobId, ApiError> {
        let n = self.with(|s| {
            s.started.push((kind.clone(), params));
            s.started.len()
        });
        Ok(JobId::new(format!("{kind}-{n}")))
    }
}

type FeedItem = Result<FeedEvent, FeedError>;

#[derive(Default)]
struct FeedState {
    connects: HashMap<JobId, usize>,
    open: HashMap<JobId, mpsc::UnboundedSender<FeedItem>>,
    refused: Vec<JobId>,
    hollow: Vec<JobId>,
}

/// Feed whose streams are driven by the test through `push` and friends.
#[derive(Default)]
pub(crate) struct FakeFeed {
    state: Mutex<FeedState>,
}

impl FakeFeed {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut FeedState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn push(&self, job_id: &JobId, event: FeedEvent) {
        self.with(|s| {
            if let Some(tx) = s.open.get(job_id) {
                let _ = tx.send(Ok(event));
            }
        });
    }

    /// Server closes the stream cleanly.
    pub(crate) fn drop_connection(&self, job_id: &JobId) {
        self.with(|s| s.open.remove(job_id));
    }

    /// Stream yields a transport error.
    pub(crate) fn fail_transport(&self, job_id: &JobId) {
        self.with(|s| {
            if let Some(tx) = s.open.remove(job_id) {
                let _ = tx.send(Err(FeedError::Transport("connection reset".into())));
            }
        });
    }

    pub(crate) fn refuse(&self, job_id: &JobId) {
        self.with(|s| s.refused.push(job_id.clone()));
    }

    /// Connections succeed but the server closes them before sending anything.
    pub(crate) fn close_on_open(&self, job_id: &JobId) {
        self.with(|s| s.hollow.push(job_id.clone()));
    }

    pub(crate) fn connect_count(&self, job_id: &JobId) -> usize {
        self.with(|s| s.connects.get(job_id).copied().unwrap_or(0))
    }

    /// Whether the consumer still holds the stream for `job_id`.
    pub(crate) fn is_open(&self, job_id: &JobId) -> bool {
        self.with(|s| s.open.get(job_id).is_some_and(|tx| !tx.is_closed()))
    }
}

#[async_trait]
impl FeedConnector for FakeFeed {
    async fn connect(&self, job_id: &JobId) -> Result<FeedStream, FeedError> {
        let rx = self.with(|s| {
            *s.connects.entry(job_id.clone()).or_default() += 1;
            if s.refused.contains(job_id) {
                return None;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            if !s.hollow.contains(job_id) {
                s.open.insert(job_id.clone(), tx);
            }
            Some(rx)
        });
        let Some(rx) = rx else {
            return Err(FeedError::Connect {
                url: format!("ws://fake/{job_id}"),
                message: "connection refused".into(),
            });
        };
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

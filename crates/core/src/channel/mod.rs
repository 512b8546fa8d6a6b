// crates/core/src/channel/mod.rs
//! Per-job live state, shared by any number of observers.
//!
//! `ProgressChannel` keeps at most one driver task (and so one feed
//! connection) per job. Observers hold a [`Subscription`] onto the driver's
//! `watch` channel; the driver is torn down when the last one is released.

mod driver;
mod reconcile;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::Stream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use jobwatch_types::{ChannelState, JobId, JobPhase};

use crate::api::JobApi;
use crate::config::{ReconnectPolicy, TrackerConfig};
use crate::feed::FeedConnector;

use driver::Driver;
use reconcile::Reconciler;

const TERMINAL_CAPACITY: usize = 256;

/// Sent once when a job's channel state first becomes terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalNotice {
    pub job_id: JobId,
    pub phase: JobPhase,
}

struct Slot {
    id: u64,
    observers: usize,
    state_rx: watch::Receiver<ChannelState>,
    driver: JoinHandle<()>,
}

struct Shared {
    api: Arc<dyn JobApi>,
    feed: Arc<dyn FeedConnector>,
    policy: ReconnectPolicy,
    max_errors: usize,
    slots: Mutex<HashMap<JobId, Slot>>,
    terminal_tx: broadcast::Sender<TerminalNotice>,
    next_slot_id: AtomicU64,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, HashMap<JobId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            error!("progress channel slot table poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn release(&self, job_id: &JobId, slot_id: u64) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(job_id) else {
            return;
        };
        if slot.id != slot_id {
            return;
        }
        slot.observers = slot.observers.saturating_sub(1);
        if slot.observers > 0 {
            debug!(%job_id, observers = slot.observers, "observer released");
            return;
        }
        if let Some(slot) = slots.remove(job_id) {
            slot.driver.abort();
            debug!(%job_id, "last observer released; live feed closed");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let slots = match self.slots.get_mut() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, slot) in slots.drain() {
            slot.driver.abort();
        }
    }
}

/// Cheap to clone; clones share the same slot table.
#[derive(Clone)]
pub struct ProgressChannel {
    shared: Arc<Shared>,
}

impl ProgressChannel {
    pub fn new(
        api: Arc<dyn JobApi>,
        feed: Arc<dyn FeedConnector>,
        config: &TrackerConfig,
    ) -> Self {
        let (terminal_tx, _) = broadcast::channel(TERMINAL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                api,
                feed,
                policy: config.reconnect,
                max_errors: config.max_retained_errors,
                slots: Mutex::new(HashMap::new()),
                terminal_tx,
                next_slot_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register an observer for `job_id`.
    ///
    /// The first observer spawns the job's driver, which pulls a snapshot
    /// and opens the live feed concurrently. Later observers attach to the
    /// existing driver and get its current state. Must be called from
    /// within a Tokio runtime.
    pub fn observe(&self, job_id: &JobId) -> (ChannelState, Subscription) {
        let mut slots = self.shared.slots();
        let slot = slots.entry(job_id.clone()).or_insert_with(|| {
            debug!(%job_id, "first observer; opening live feed");
            self.spawn_slot(job_id)
        });
        slot.observers += 1;

        let mut rx = slot.state_rx.clone();
        let initial = rx.borrow_and_update().clone();
        let subscription = Subscription {
            job_id: job_id.clone(),
            slot_id: slot.id,
            rx,
            channel: Arc::downgrade(&self.shared),
            released: false,
        };
        (initial, subscription)
    }

    fn spawn_slot(&self, job_id: &JobId) -> Slot {
        let (state_tx, state_rx) = watch::channel(ChannelState::default());
        let driver = Driver {
            job_id: job_id.clone(),
            api: Arc::clone(&self.shared.api),
            feed: Arc::clone(&self.shared.feed),
            policy: self.shared.policy,
            reconciler: Reconciler::new(job_id.clone(), self.shared.max_errors),
            state_tx,
            terminal_tx: self.shared.terminal_tx.clone(),
        };
        Slot {
            id: self.shared.next_slot_id.fetch_add(1, Ordering::Relaxed),
            observers: 0,
            state_rx,
            driver: tokio::spawn(driver.run()),
        }
    }

    /// Current state of an open channel, without registering an observer.
    pub fn peek(&self, job_id: &JobId) -> Option<ChannelState> {
        self.shared
            .slots()
            .get(job_id)
            .map(|slot| slot.state_rx.borrow().clone())
    }

    pub fn observer_count(&self, job_id: &JobId) -> usize {
        self.shared
            .slots()
            .get(job_id)
            .map(|slot| slot.observers)
            .unwrap_or(0)
    }

    pub fn open_channels(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.shared.slots().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Terminal transitions of every job observed through this channel.
    pub fn subscribe_terminal(&self) -> broadcast::Receiver<TerminalNotice> {
        self.shared.terminal_tx.subscribe()
    }
}

/// One observer's view of a job's `ChannelState`.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    job_id: JobId,
    slot_id: u64,
    rx: watch::Receiver<ChannelState>,
    channel: Weak<Shared>,
    released: bool,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn current(&self) -> ChannelState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change.
    ///
    /// Returns `None` once the driver has stopped (terminal phase, reconnect
    /// policy exhausted, or the channel was dropped); `current()` still holds
    /// the final state.
    pub async fn changed(&mut self) -> Option<ChannelState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Successive states as a stream, ending when the driver stops.
    pub fn into_stream(self) -> impl Stream<Item = ChannelState> + Send + Unpin {
        Box::pin(futures_util::stream::unfold(self, |mut sub| async move {
            let state = sub.changed().await?;
            Some((state, sub))
        }))
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(shared) = self.channel.upgrade() {
            shared.release(&self.job_id, self.slot_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("slot_id", &self.slot_id)
            .field("released", &self.released)
            .finish()
    }
}

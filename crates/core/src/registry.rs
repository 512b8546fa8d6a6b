// crates/core/src/registry.rs
//
// The set of jobs the application is actively tracking. Seeded from the
// server at startup, extended when a job is triggered locally, and pruned
// a grace period after each job turns terminal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use jobwatch_types::{JobId, JobKind};

use crate::api::JobApi;

const EVENT_CAPACITY: usize = 256;

/// Kind recorded for restored jobs whose snapshot does not say.
pub const UNKNOWN_KIND: &str = "unknown";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJobRecord {
    pub job_id: JobId,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(ActiveJobRecord),
    Removed(JobId),
}

struct Entry {
    record: ActiveJobRecord,
    /// Distinguishes this membership from an earlier one for the same id.
    epoch: u64,
    /// Removal already scheduled.
    notified: bool,
}

struct Inner {
    api: Arc<dyn JobApi>,
    grace: Duration,
    jobs: Mutex<HashMap<JobId, Entry>>,
    next_epoch: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            error!("job registry lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Insert unless already tracked. Returns whether a record was created.
    fn insert(&self, record: ActiveJobRecord) -> bool {
        {
            let mut jobs = self.jobs();
            if jobs.contains_key(&record.job_id) {
                return false;
            }
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            jobs.insert(
                record.job_id.clone(),
                Entry {
                    record: record.clone(),
                    epoch,
                    notified: false,
                },
            );
        }
        debug!(job_id = %record.job_id, kind = %record.kind, "job added to active set");
        let _ = self.events.send(RegistryEvent::Added(record));
        true
    }

    fn remove_where(
        &self,
        job_id: &JobId,
        keep: impl FnOnce(&Entry) -> bool,
    ) -> Option<ActiveJobRecord> {
        let removed = {
            let mut jobs = self.jobs();
            if !jobs.get(job_id).is_some_and(|entry| !keep(entry)) {
                return None;
            }
            jobs.remove(job_id).map(|entry| entry.record)
        }?;
        let _ = self.events.send(RegistryEvent::Removed(job_id.clone()));
        Some(removed)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Active-set membership. Cheap to clone.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("active", &self.len())
            .field("grace", &self.inner.grace)
            .finish()
    }
}

impl JobRegistry {
    pub fn new(api: Arc<dyn JobApi>, grace: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                grace,
                jobs: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Seed the active set with every pending or running job the server
    /// knows about. A failed query is logged and treated as "no active
    /// jobs". Returns the number of records created.
    pub async fn restore(&self) -> usize {
        let jobs = match self.inner.api.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "could not restore active jobs; starting empty");
                return 0;
            }
        };

        let total = jobs.len();
        let mut restored = 0;
        for job in jobs {
            let Some(phase) = job.phase() else {
                debug!(job_id = %job.job_id, status = %job.status, "skipping job with unknown status");
                continue;
            };
            if phase.is_terminal() {
                continue;
            }
            let record = ActiveJobRecord {
                started_at: job.started_at().unwrap_or_else(Utc::now),
                kind: job
                    .job_type
                    .clone()
                    .unwrap_or_else(|| JobKind::from(UNKNOWN_KIND)),
                job_id: job.job_id,
            };
            if self.inner.insert(record) {
                restored += 1;
            }
        }
        info!(restored, listed = total, "active jobs restored");
        restored
    }

    /// Track a job that was just triggered. Idempotent: an already tracked
    /// job keeps its original record. Returns whether a record was created.
    pub fn add(&self, job_id: JobId, kind: JobKind) -> bool {
        self.inner.insert(ActiveJobRecord {
            job_id,
            kind,
            started_at: Utc::now(),
        })
    }

    /// Drop a job immediately, cancelling any pending scheduled removal.
    pub fn remove(&self, job_id: &JobId) -> Option<ActiveJobRecord> {
        let removed = self.inner.remove_where(job_id, |_| false);
        if removed.is_some() {
            debug!(%job_id, "job dismissed");
        }
        removed
    }

    /// Schedule removal of a job that reached a terminal phase, after the
    /// grace period. Only the first call per membership schedules anything.
    /// Returns whether a removal was scheduled.
    pub fn on_terminal(&self, job_id: &JobId) -> bool {
        let epoch = {
            let mut jobs = self.inner.jobs();
            let Some(entry) = jobs.get_mut(job_id) else {
                return false;
            };
            if entry.notified {
                return false;
            }
            entry.notified = true;
            entry.epoch
        };

        let grace = self.inner.grace;
        let deadline = tokio::time::Instant::now() + grace;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let job_id = job_id.clone();
        debug!(%job_id, grace_ms = grace.as_millis() as u64, "terminal job removal scheduled");
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Skip if the job was dismissed and re-added meanwhile.
            if inner
                .remove_where(&job_id, |entry| entry.epoch != epoch)
                .is_some()
            {
                info!(%job_id, "terminal job removed after grace period");
            }
        });
        true
    }

    /// Snapshot of the active set, oldest first.
    pub fn active(&self) -> Vec<ActiveJobRecord> {
        let mut records: Vec<ActiveJobRecord> = self
            .inner
            .jobs()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.job_id.as_str().cmp(b.job_id.as_str()))
        });
        records
    }

    pub fn get(&self, job_id: &JobId) -> Option<ActiveJobRecord> {
        self.inner.jobs().get(job_id).map(|e| e.record.clone())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.inner.jobs().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }
}

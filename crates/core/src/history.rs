// crates/core/src/history.rs
//! On-demand cache of finished jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use jobwatch_types::HistoryEntry;

use crate::api::JobApi;
use crate::error::HistoryError;

/// Holds the last fetched history list. No background refresh; callers
/// decide when a fresh copy is needed.
#[derive(Clone)]
pub struct HistoryCache {
    api: Arc<dyn JobApi>,
    // Held across the fetch, so concurrent callers wait for one request.
    cached: Arc<Mutex<Option<Vec<HistoryEntry>>>>,
    fetches: Arc<AtomicU64>,
}

impl HistoryCache {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            cached: Arc::new(Mutex::new(None)),
            fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cached list if present and `force_refresh` is false, else a fresh
    /// fetch. A failed refresh falls back to the cached list when one exists.
    pub async fn list(&self, force_refresh: bool) -> Result<Vec<HistoryEntry>, HistoryError> {
        let seen = self.fetches.load(Ordering::Acquire);
        let mut cached = self.cached.lock().await;
        if let Some(entries) = cached.as_ref() {
            // A fetch that finished while we waited counts as our refresh.
            let refreshed_meanwhile = self.fetches.load(Ordering::Acquire) != seen;
            if !force_refresh || refreshed_meanwhile {
                debug!(entries = entries.len(), "serving cached job history");
                return Ok(entries.clone());
            }
        }

        match self.api.list_history().await {
            Ok(entries) => {
                debug!(entries = entries.len(), "job history refreshed");
                *cached = Some(entries.clone());
                self.fetches.fetch_add(1, Ordering::Release);
                Ok(entries)
            }
            Err(e) => match cached.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "history refresh failed; serving cached list");
                    Ok(stale.clone())
                }
                None => Err(HistoryError(e)),
            },
        }
    }

    /// Cached list without touching the network.
    pub async fn cached(&self) -> Option<Vec<HistoryEntry>> {
        self.cached.lock().await.clone()
    }

    pub async fn clear(&self) {
        *self.cached.lock().await = None;
    }
}

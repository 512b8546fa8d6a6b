// crates/core/src/lib.rs
pub mod api;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod registry;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{HttpJobApi, JobApi};
pub use cancel::{CancelOutcome, CancellationController};
pub use channel::{ProgressChannel, Subscription, TerminalNotice};
pub use config::{ReconnectPolicy, TrackerConfig, API_URL_ENV, FEED_URL_ENV};
pub use error::*;
pub use feed::{FeedConnector, FeedStream, WsFeedConnector};
pub use history::HistoryCache;
pub use registry::{ActiveJobRecord, JobRegistry, RegistryEvent};
pub use tracker::JobTracker;

pub use jobwatch_types as types;

// crates/core/src/feed.rs
//! Live per-job event feed.
//!
//! A `FeedConnector` opens one streaming connection for one job and yields
//! decoded `FeedEvent`s. The stream ending (or yielding an error) means the
//! transport dropped; reconnect policy lives in the progress channel, not here.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use jobwatch_types::{FeedDecodeError, FeedEvent, JobId};

use crate::config::TrackerConfig;
use crate::error::FeedError;

/// Decoded events from one open feed connection.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedEvent, FeedError>> + Send>>;

#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open the live feed for `job_id`. Dropping the returned stream closes it.
    async fn connect(&self, job_id: &JobId) -> Result<FeedStream, FeedError>;
}

/// WebSocket feed: one socket per job at `{feed_base}{feed_path}`.
#[derive(Debug, Clone)]
pub struct WsFeedConnector {
    config: TrackerConfig,
    connect_timeout: Duration,
}

impl WsFeedConnector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            config: config.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn url_for(&self, job_id: &JobId) -> String {
        self.config.feed_url(job_id.as_str())
    }
}

#[async_trait]
impl FeedConnector for WsFeedConnector {
    async fn connect(&self, job_id: &JobId) -> Result<FeedStream, FeedError> {
        let url = self.url_for(job_id);
        let (ws_stream, _response) =
            match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => {
                    return Err(FeedError::Connect {
                        url,
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(FeedError::Connect {
                        url,
                        message: format!("timed out after {:?}", self.connect_timeout),
                    })
                }
            };
        debug!(%job_id, %url, "live feed connected");

        let job_id = job_id.clone();
        let events = ws_stream.filter_map(move |frame| future::ready(decode_frame(&job_id, frame)));
        Ok(Box::pin(events))
    }
}

/// Map one WebSocket frame to a feed item. Control frames, unknown event
/// types and malformed payloads are logged and skipped.
fn decode_frame(
    job_id: &JobId,
    frame: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<FeedEvent, FeedError>> {
    let text = match frame {
        Ok(Message::Text(text)) => text.as_str().to_owned(),
        Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                warn!(%job_id, len = bytes.len(), "non-UTF-8 binary feed frame dropped");
                return None;
            }
        },
        Ok(_) => return None,
        Err(e) => return Some(Err(FeedError::Transport(e.to_string()))),
    };
    decode_text(job_id, &text).map(Ok)
}

fn decode_text(job_id: &JobId, text: &str) -> Option<FeedEvent> {
    match FeedEvent::decode(text) {
        Ok(event) => Some(event),
        Err(FeedDecodeError::UnknownType(tag)) => {
            warn!(%job_id, %tag, "unrecognized feed event type dropped");
            None
        }
        Err(e) => {
            warn!(%job_id, error = %e, "undecodable feed frame dropped");
            None
        }
    }
}

// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the job server's request/response endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} for {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ApiError {
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else if source.is_decode() {
            Self::Decode {
                url,
                message: source.to_string(),
            }
        } else {
            Self::Transport { url, source }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the live-feed transport. Always recovered by reconnecting.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Could not open live feed {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Live feed transport error: {0}")]
    Transport(String),
}

/// Errors loading or validating [`crate::TrackerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A cancel request that the server did not accept. The request may be retried.
#[derive(Debug, Error)]
#[error("Cancel request for job {job_id} failed: {source}")]
pub struct CancelError {
    pub job_id: String,
    #[source]
    pub source: ApiError,
}

/// History could not be fetched and no cached list was available.
#[derive(Debug, Error)]
#[error("Could not load job history: {0}")]
pub struct HistoryError(#[from] pub ApiError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::HttpStatus {
            url: "http://x/jobs/1".into(),
            status: 404,
            body: "not found".into(),
        };
        assert!(err.to_string().contains("404"));
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            ApiError::Timeout {
                url: "http://x".into()
            }
            .status(),
            None
        );
    }

    #[test]
    fn test_cancel_error_carries_job() {
        let err = CancelError {
            job_id: "J3".into(),
            source: ApiError::HttpStatus {
                url: "http://x/jobs/J3/cancel".into(),
                status: 500,
                body: String::new(),
            },
        };
        assert!(err.to_string().contains("J3"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid("feed_path".into());
        assert!(err.to_string().contains("feed_path"));
    }
}

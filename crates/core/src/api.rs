// crates/core/src/api.rs
//! Request/response access to the job server.
//!
//! `JobApi` is the seam every stateful component talks through; it holds no
//! state of its own. `HttpJobApi` is the reqwest-backed implementation.

use std::borrow::Cow;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use jobwatch_types::{CancelResponse, HistoryEntry, JobId, JobKind, JobStatus, StartJobResponse};

use crate::config::TrackerConfig;
use crate::error::ApiError;

/// Pull-based job server endpoints.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// `GET /jobs/{id}`: point-in-time snapshot of one job.
    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ApiError>;

    /// `GET /jobs`: every job the server currently knows about.
    async fn list_jobs(&self) -> Result<Vec<JobStatus>, ApiError>;

    /// `POST /jobs/{id}/cancel`.
    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, ApiError>;

    /// `GET /jobs/history`: finished jobs.
    async fn list_history(&self) -> Result<Vec<HistoryEntry>, ApiError>;

    /// `POST /jobs/{kind}`: trigger a job, returning its server-issued id.
    async fn start_job(
        &self,
        kind: &JobKind,
        params: serde_json::Value,
    ) -> Result<JobId, ApiError>;
}

/// `JobApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: Client,
    base_url: String,
}

impl HttpJobApi {
    pub fn new(config: &TrackerConfig) -> Result<Self, ApiError> {
        let base_url = config.api_base_url.trim_end_matches('/').to_owned();
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::from_reqwest(base_url.clone(), e))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let parsed = reqwest::Url::parse(&url).map_err(|e| ApiError::InvalidUrl {
            url: url.clone(),
            message: e.to_string(),
        })?;
        debug!(%method, %url, "job api request");

        let mut request = self.client.request(method, parsed);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url.clone(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::HttpStatus {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        let response = self.send(method, path, body).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(self.url(path), e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            url: self.url(path),
            message: e.to_string(),
        })
    }
}

/// Percent-encodes an id or kind so it stays a single path segment.
fn segment(raw: &str) -> Cow<'_, str> {
    urlencoding::encode(raw)
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ApiError> {
        self.json(Method::GET, &format!("/jobs/{}", segment(job_id.as_str())), None)
            .await
    }

    async fn list_jobs(&self) -> Result<Vec<JobStatus>, ApiError> {
        self.json(Method::GET, "/jobs", None).await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, ApiError> {
        self.json(
            Method::POST,
            &format!("/jobs/{}/cancel", segment(job_id.as_str())),
            None,
        )
        .await
    }

    async fn list_history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        let raw: Vec<serde_json::Value> = self.json(Method::GET, "/jobs/history", None).await?;
        let listed = raw.len();
        let entries: Vec<HistoryEntry> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable history entry");
                    None
                }
            })
            .collect();
        debug!(listed, kept = entries.len(), "history fetched");
        Ok(entries)
    }

    async fn start_job(
        &self,
        kind: &JobKind,
        params: serde_json::Value,
    ) -> Result<JobId, ApiError> {
        let response: StartJobResponse = self
            .json(
                Method::POST,
                &format!("/jobs/{}", segment(kind.as_str())),
                Some(&params),
            )
            .await?;
        Ok(response.job_id)
    }
}

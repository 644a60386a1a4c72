//! HTTP client for the graph service API.
//!
//! Only the requests used by graph search, ingestion, cloning, and task
//! polling are implemented here.

use crate::task::TaskSource;
use crate::types::{
    AddBatchRequest, AddDataRequest, CloneGraphRequest, CloneGraphResponse, Episode,
    GraphSearchQuery, TaskRecord,
};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.getzep.com/api/v2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("no API key configured; pass --api-key or set GRAPHCTL_API_KEY")]
    MissingApiKey,
}

/// Thin authenticated wrapper around `reqwest::Client`.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .user_agent(format!("graphctl/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let resp = request
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .send()
            .await?;
        let status = resp.status();
        debug!(%status, url = %resp.url(), "response received");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(resp.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(%url, "GET");
        self.send(self.http.get(url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(%url, "POST");
        self.send(self.http.post(url).json(body)).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, ClientError> {
        self.get(&format!("tasks/{}", task_id)).await
    }

    /// Search a graph. The response shape depends on the scope, so it is
    /// returned as raw JSON.
    pub async fn search_graph(
        &self,
        query: &GraphSearchQuery,
    ) -> Result<serde_json::Value, ClientError> {
        self.post("graph/search", query).await
    }

    pub async fn add_data(&self, request: &AddDataRequest) -> Result<Episode, ClientError> {
        self.post("graph", request).await
    }

    pub async fn add_batch(&self, request: &AddBatchRequest) -> Result<Vec<Episode>, ClientError> {
        self.post("graph-batch", request).await
    }

    pub async fn clone_graph(
        &self,
        request: &CloneGraphRequest,
    ) -> Result<CloneGraphResponse, ClientError> {
        self.post("graph/clone", request).await
    }
}

#[async_trait]
impl TaskSource for ApiClient {
    async fn fetch_task(&self, task_id: &str) -> Result<TaskRecord, ClientError> {
        self.get_task(task_id).await
    }
}

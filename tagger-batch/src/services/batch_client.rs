//! Remote batch API client
//!
//! [`BatchApi`] is the seam between the pipeline and the remote service.
//! [`HttpBatchClient`] speaks the OpenAI-compatible files/batches protocol:
//!
//! - `POST {base}/files` (multipart, `purpose=batch`)
//! - `POST {base}/batches`
//! - `GET  {base}/batches/{id}`
//! - `GET  {base}/files/{id}/content`

use crate::models::BatchJob;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("tagger-batch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
/// Longest error body kept in error messages
const MAX_ERROR_BODY: usize = 500;

/// Batch API client errors
#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiClientError {
    /// Network failures, timeouts, rate limiting and server errors
    pub fn is_transient(&self) -> bool {
        match self {
            ApiClientError::Network(_) => true,
            ApiClientError::Http { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            ApiClientError::Parse(_) => false,
        }
    }
}

/// Operations consumed from the remote batch service
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Upload a JSONL request file, returning its file id
    async fn upload_batch_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, ApiClientError>;

    /// Create a batch job from an uploaded file
    async fn create_batch(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
    ) -> Result<BatchJob, ApiClientError>;

    /// Fetch current job status and request counts
    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, ApiClientError>;

    /// Download an output or error artifact
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiClientError>;
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

/// HTTP implementation of [`BatchApi`]
pub struct HttpBatchClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBatchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiClientError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ApiClientError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ApiClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiClientError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BatchApi for HttpBatchClient {
    async fn upload_batch_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, ApiClientError> {
        let size = contents.len();
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| ApiClientError::Parse(e.to_string()))?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        tracing::debug!(file_name, size, "Uploading batch request file");
        let file: FileObject = self
            .send_json(self.http_client.post(self.url("files")).multipart(form))
            .await?;

        tracing::info!(file_id = %file.id, size, "Batch request file uploaded");
        Ok(file.id)
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
    ) -> Result<BatchJob, ApiClientError> {
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": endpoint,
            "completion_window": completion_window,
            "metadata": { "source": "tagger-batch" },
        });

        let job: BatchJob = self
            .send_json(self.http_client.post(self.url("batches")).json(&body))
            .await?;

        tracing::info!(job_id = %job.id, status = %job.status, "Batch job created");
        Ok(job)
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, ApiClientError> {
        self.send_json(self.http_client.get(self.url(&format!("batches/{}", batch_id))))
            .await
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiClientError> {
        let response = self
            .send(self.http_client.get(self.url(&format!("files/{}/content", file_id))))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiClientError::Network(e.to_string()))?;

        tracing::debug!(file_id, size = bytes.len(), "Downloaded file");
        Ok(bytes.to_vec())
    }
}

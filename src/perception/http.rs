//! HTTP perception service
//!
//! Posts chunk bytes to an inference endpoint and reads back a
//! [`RawInference`] JSON body. HTTP 422 means the model found no face or
//! voice in the chunk.

use crate::error::EvaluationError;
use crate::perception::{MediaChunk, PerceptionService, RawInference, ServiceError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

/// Inference service reached over HTTP
pub struct HttpPerceptionService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPerceptionService {
    /// Create a client for `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, EvaluationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluationError::ConfigurationError(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PerceptionService for HttpPerceptionService {
    async fn infer(&self, chunk: &MediaChunk) -> Result<RawInference, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("start_sec", chunk.start_sec), ("end_sec", chunk.end_sec)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.payload.clone())
            .send()
            .await
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = response.text().await.unwrap_or_default();
            return Err(ServiceError::NoSignal(reason));
        }
        if !status.is_success() {
            return Err(ServiceError::Unreachable(format!(
                "{} returned HTTP {}",
                self.endpoint, status
            )));
        }

        response
            .json::<RawInference>()
            .await
            .map_err(|e| ServiceError::Unreachable(format!("invalid response body: {}", e)))
    }
}

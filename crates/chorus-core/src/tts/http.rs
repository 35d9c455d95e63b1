use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::backend::{SynthesisBackend, SynthesisError};
use super::wire::{JobResponse, SynthesisRequest};

/// `reqwest` client for a `/run` + `/status/{id}` synthesis endpoint.
pub struct HttpSynthesisBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSynthesisBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SynthesisError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(SynthesisError::Configuration(
                "synthesis endpoint is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SynthesisError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<JobResponse, SynthesisError> {
        let response = check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| SynthesisError::Transient(format!("body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| SynthesisError::Transient(format!("malformed response: {e}")))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SynthesisError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let message = format!("status {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Err(SynthesisError::Configuration(message))
        }
        _ => Err(SynthesisError::Transient(message)),
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesisBackend {
    async fn submit(&self, request: &SynthesisRequest) -> Result<JobResponse, SynthesisError> {
        let url = format!("{}/run", self.endpoint);
        tracing::debug!(chars = request.text.chars().count(), voice = %request.voice_ref, "Submitting synthesis job");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("request: {e}")))?;
        self.read_json(response).await
    }

    async fn status(&self, job_id: &str) -> Result<JobResponse, SynthesisError> {
        let url = format!("{}/status/{}", self.endpoint, job_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("request: {e}")))?;
        self.read_json(response).await
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("audio download: {e}")))?;
        let response = check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transient(format!("audio body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

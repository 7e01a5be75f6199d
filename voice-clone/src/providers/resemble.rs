//! Resemble AI clips API provider
//!
//! A job is a clip whose body is a `<resemble:convert>` tag pointing at the
//! staged narration. The clip's `audio_src` appears once conversion is done.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ValidatedConfig;
use crate::error::{CloneError, Result};
use crate::provider::{CloningProvider, JobId, JobStatus};

/// Provider for the Resemble AI v2 clips endpoint
pub struct ResembleProvider {
    api_base: String,
    project_id: String,
    api_key: String,
    client: Client,
}

impl ResembleProvider {
    pub fn new(config: &ValidatedConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CloneError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base: config.api_base.clone(),
            project_id: config.project_id.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn clips_url(&self) -> String {
        format!("{}/projects/{}/clips", self.api_base, self.project_id)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_key)
    }
}

// Resemble API request/response types

#[derive(Debug, Serialize)]
struct CreateClipRequest {
    voice_uuid: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct ClipResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    item: Option<ClipItem>,
}

#[derive(Debug, Deserialize)]
struct ClipItem {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    audio_src: Option<String>,
}

fn convert_body(source_url: &str) -> String {
    format!("<resemble:convert src='{}'></resemble:convert>", source_url)
}

/// Turn a non-2xx response into a provider error carrying the API message.
async fn error_from_response(response: Response) -> CloneError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ClipResponse>(&text)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or(text);

    CloneError::Provider {
        message,
        status_code: Some(status),
    }
}

fn interpret_poll(response: ClipResponse) -> JobStatus {
    if let Some(src) = response
        .item
        .as_ref()
        .and_then(|item| item.audio_src.as_deref())
        .filter(|src| !src.is_empty())
    {
        return JobStatus::Ready {
            result_url: src.to_string(),
        };
    }

    if !response.success {
        if let Some(message) = response.message {
            return JobStatus::Failed { message };
        }
    }

    JobStatus::Pending
}

#[async_trait]
impl CloningProvider for ResembleProvider {
    async fn submit(&self, source_url: &str, voice_id: &str) -> Result<JobId> {
        let request = CreateClipRequest {
            voice_uuid: voice_id.to_string(),
            body: convert_body(source_url),
        };

        let response = self
            .client
            .post(self.clips_url())
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CloneError::transport(format!("Submit request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let clip: ClipResponse = response
            .json()
            .await
            .map_err(|e| CloneError::provider(format!("Failed to parse submit response: {}", e)))?;

        if !clip.success {
            return Err(CloneError::provider(
                clip.message
                    .unwrap_or_else(|| "request was not accepted".to_string()),
            ));
        }

        clip.item
            .and_then(|item| item.uuid)
            .filter(|uuid| !uuid.is_empty())
            .map(JobId)
            .ok_or_else(|| CloneError::provider("accepted response carried no clip id"))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus> {
        let response = self
            .client
            .get(format!("{}/{}", self.clips_url(), job))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| CloneError::transport(format!("Poll request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let clip: ClipResponse = response
            .json()
            .await
            .map_err(|e| CloneError::transport(format!("Failed to parse poll response: {}", e)))?;

        Ok(interpret_poll(clip))
    }

    async fn fetch(&self, result_url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(result_url)
            .send()
            .await
            .map_err(|e| CloneError::transport(format!("Result download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloneError::Transport {
                message: format!("Result download failed for {}", result_url),
                status_code: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CloneError::transport(format!("Error reading result body: {}", e)))?;

        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "Resemble AI"
    }
}

//! bashupload-style staging host
//!
//! Accepts a multipart `file` field and answers with plain text containing a
//! `wget <url>` line.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

use crate::error::{CloneError, Result};
use crate::provider::StagingHost;

pub struct BashUploadHost {
    endpoint: String,
    client: Client,
}

impl BashUploadHost {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| CloneError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

/// Pull the public URL out of the host's plain-text reply.
pub fn parse_public_url(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("wget"))
        .find_map(|line| line.split_whitespace().nth(1))
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .map(str::to_string)
}

#[async_trait]
impl StagingHost for BashUploadHost {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CloneError::transport(format!("Upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloneError::Transport {
                message: format!("{} rejected the upload", self.endpoint),
                status_code: Some(status.as_u16()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CloneError::transport(format!("Error reading upload reply: {}", e)))?;

        parse_public_url(&body).ok_or_else(|| {
            CloneError::transport(format!("No public URL in reply from {}", self.endpoint))
        })
    }

    fn name(&self) -> &'static str {
        "bashupload"
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CloneError, Result};
use crate::retry::RetryPolicy;

pub const API_KEY_ENV: &str = "RESEMBLE_API_KEY";
pub const PROJECT_ID_ENV: &str = "RESEMBLE_PROJECT_ID";
pub const VOICE_ID_ENV: &str = "RESEMBLE_VOICE_ID";

const DEFAULT_STAGING_ENDPOINT: &str = "https://bashupload.com";
const DEFAULT_API_BASE: &str = "https://app.resemble.ai/api/v2";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;
const DEFAULT_TRANSPORT_ATTEMPTS: u32 = 3;

/// Cloning configuration as it appears in the config file.
///
/// Credentials are optional here; [`CloneConfig::validate`] turns this into a
/// [`ValidatedConfig`] or reports every missing field at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    /// Temporary public file host used to give the narration a URL
    #[serde(default = "default_staging_endpoint")]
    pub staging_endpoint: String,

    /// Base URL of the cloning provider API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Attempts for upload and fetch calls. Submit is sent once; poll has its own budget
    #[serde(default = "default_transport_attempts")]
    pub transport_attempts: u32,
}

fn default_staging_endpoint() -> String {
    DEFAULT_STAGING_ENDPOINT.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_transport_attempts() -> u32 {
    DEFAULT_TRANSPORT_ATTEMPTS
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            project_id: None,
            voice_id: None,
            staging_endpoint: default_staging_endpoint(),
            api_base: default_api_base(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            transport_attempts: default_transport_attempts(),
        }
    }
}

/// Credentials and limits checked once, before any network I/O.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub api_key: String,
    pub project_id: String,
    pub voice_id: String,
    pub staging_endpoint: String,
    pub api_base: String,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub transport_retry: RetryPolicy,
}

impl CloneConfig {
    /// Fill unset credentials from the environment.
    pub fn with_env_fallback(mut self) -> Self {
        self.api_key = self.api_key.or_else(|| std::env::var(API_KEY_ENV).ok());
        self.project_id = self
            .project_id
            .or_else(|| std::env::var(PROJECT_ID_ENV).ok());
        self.voice_id = self.voice_id.or_else(|| std::env::var(VOICE_ID_ENV).ok());
        self
    }

    /// Names of required credentials that are absent, blank or still placeholders.
    pub fn missing_fields(&self) -> Vec<String> {
        [
            (API_KEY_ENV, &self.api_key),
            (PROJECT_ID_ENV, &self.project_id),
            (VOICE_ID_ENV, &self.voice_id),
        ]
        .into_iter()
        .filter(|(_, value)| !is_usable(value.as_deref()))
        .map(|(name, _)| name.to_string())
        .collect()
    }

    pub fn validate(&self) -> Result<ValidatedConfig> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(CloneError::MissingConfig { fields: missing });
        }
        if self.poll_interval_secs == 0 {
            return Err(CloneError::InvalidConfig(
                "poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(CloneError::InvalidConfig(
                "max_poll_attempts must be greater than zero".into(),
            ));
        }

        // missing_fields() guarantees all three are present
        let take = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();

        Ok(ValidatedConfig {
            api_key: take(&self.api_key),
            project_id: take(&self.project_id),
            voice_id: take(&self.voice_id),
            staging_endpoint: self.staging_endpoint.trim_end_matches('/').to_string(),
            api_base: self.api_base.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_poll_attempts: self.max_poll_attempts,
            transport_retry: RetryPolicy {
                max_attempts: self.transport_attempts.max(1),
                ..RetryPolicy::default()
            },
        })
    }
}

/// Template values shipped in sample `.env` files count as unset.
fn is_usable(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !v.starts_with('#'),
    }
}

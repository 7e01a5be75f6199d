use async_trait::async_trait;

use crate::error::Result;

/// Provider-assigned identifier of a cloning job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a single status poll reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready { result_url: String },
    Failed { message: String },
}

/// Temporary public host that hands a local file a retrievable URL.
#[async_trait]
pub trait StagingHost: Send + Sync {
    /// Upload `bytes` and return the public URL the provider can fetch.
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String>;

    /// Host name for display
    fn name(&self) -> &'static str;
}

/// Remote service that re-voices a staged narration.
#[async_trait]
pub trait CloningProvider: Send + Sync {
    /// Create a job converting `source_url` into `voice_id`.
    async fn submit(&self, source_url: &str, voice_id: &str) -> Result<JobId>;

    /// Check a job's status once.
    async fn poll(&self, job: &JobId) -> Result<JobStatus>;

    /// Download a finished result.
    async fn fetch(&self, result_url: &str) -> Result<Vec<u8>>;

    /// Provider name for display
    fn name(&self) -> &'static str;
}

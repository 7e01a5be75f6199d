//! Mock staging host and cloning provider for testing
//!
//! The provider follows a poll script so tests can drive the job through
//! pending, ready, failed and timed-out outcomes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CloneError, Result};
use crate::provider::{CloningProvider, JobId, JobStatus, StagingHost};

/// One scripted answer to `poll`.
#[derive(Debug, Clone)]
pub enum PollStep {
    Pending,
    Ready,
    Failed(String),
    /// Network blip: poll returns a transport error
    Unreachable,
}

/// A scripted cloning provider
pub struct MockProvider {
    submit_error: Mutex<Option<CloneError>>,
    script: Mutex<VecDeque<PollStep>>,
    /// Answer once the script is exhausted
    then: PollStep,
    result: Vec<u8>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    submissions: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    fn scripted(steps: Vec<PollStep>, then: PollStep, result: &[u8]) -> Self {
        Self {
            submit_error: Mutex::new(None),
            script: Mutex::new(steps.into()),
            then,
            result: result.to_vec(),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Report pending `n` times, then ready with `result`
    pub fn ready_after(n: usize, result: &[u8]) -> Self {
        Self::scripted(vec![PollStep::Pending; n], PollStep::Ready, result)
    }

    /// Never report readiness
    pub fn never_ready() -> Self {
        Self::scripted(Vec::new(), PollStep::Pending, &[])
    }

    /// Report pending `n` times, then an explicit failure
    pub fn fails_after(n: usize, message: &str) -> Self {
        Self::scripted(
            vec![PollStep::Pending; n],
            PollStep::Failed(message.to_string()),
            &[],
        )
    }

    /// Follow an explicit poll script, then stay on `then`
    pub fn with_script(steps: Vec<PollStep>, then: PollStep, result: &[u8]) -> Self {
        Self::scripted(steps, then, result)
    }

    /// Reject job submission with `error`
    pub fn rejects_submit(error: CloneError) -> Self {
        let provider = Self::never_ready();
        *provider.submit_error.lock().unwrap() = Some(error);
        provider
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// (source_url, voice_id) pairs seen by `submit`
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloningProvider for MockProvider {
    async fn submit(&self, source_url: &str, voice_id: &str) -> Result<JobId> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.submit_error.lock().unwrap().as_ref() {
            return Err(clone_error(err));
        }
        self.submissions
            .lock()
            .unwrap()
            .push((source_url.to_string(), voice_id.to_string()));
        Ok(JobId(format!("mock-job-{}", n + 1)))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.then.clone());

        match step {
            PollStep::Pending => Ok(JobStatus::Pending),
            PollStep::Ready => Ok(JobStatus::Ready {
                result_url: format!("mock://results/{}.wav", job),
            }),
            PollStep::Failed(message) => Ok(JobStatus::Failed { message }),
            PollStep::Unreachable => Err(CloneError::transport("mock provider unreachable")),
        }
    }

    async fn fetch(&self, _result_url: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A staging host that either serves a fixed URL or always fails
pub struct MockStagingHost {
    url: Option<String>,
    uploads: Mutex<Vec<(String, usize)>>,
}

impl MockStagingHost {
    pub fn serving(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            url: None,
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// (file_name, byte_count) of each upload
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StagingHost for MockStagingHost {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((file_name.to_string(), bytes.len()));
        self.url.clone().ok_or(CloneError::Transport {
            message: "mock staging host refused upload".to_string(),
            status_code: Some(503),
        })
    }

    fn name(&self) -> &'static str {
        "mock-staging"
    }
}

/// Clone a CloneError (needed because CloneError doesn't implement Clone)
fn clone_error(err: &CloneError) -> CloneError {
    match err {
        CloneError::MissingConfig { fields } => CloneError::MissingConfig {
            fields: fields.clone(),
        },
        CloneError::InvalidConfig(s) => CloneError::InvalidConfig(s.clone()),
        CloneError::NoNarration(s) => CloneError::NoNarration(s.clone()),
        CloneError::Transport {
            message,
            status_code,
        } => CloneError::Transport {
            message: message.clone(),
            status_code: *status_code,
        },
        CloneError::Provider {
            message,
            status_code,
        } => CloneError::Provider {
            message: message.clone(),
            status_code: *status_code,
        },
        CloneError::Timeout { attempts } => CloneError::Timeout {
            attempts: *attempts,
        },
        CloneError::Cancelled => CloneError::Cancelled,
        CloneError::AlreadyRun => CloneError::AlreadyRun,
        CloneError::Io(e) => CloneError::transport(format!("IO error (mock): {}", e)),
    }
}

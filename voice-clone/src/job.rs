//! Single-use cloning job: stage the narration, submit, poll, fetch.
//!
//! ```text
//! Created -> Uploading -> Submitted -> Polling -> Ready
//!                                             \-> TimedOut
//!   (any step)                                \-> Failed
//! ```

use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::ValidatedConfig;
use crate::error::{CloneError, Result};
use crate::provider::{CloningProvider, JobId, JobStatus, StagingHost};
use crate::retry::is_transient;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneState {
    Created,
    Uploading,
    Submitted,
    /// `attempt` polls have been issued so far
    Polling { attempt: u32 },
    Ready,
    TimedOut,
    Failed(String),
}

impl CloneState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut | Self::Failed(_))
    }
}

/// Result of a successful job.
#[derive(Debug, Clone)]
pub struct ClonedAudio {
    pub job_id: JobId,
    pub source_url: String,
    pub bytes: Vec<u8>,
    pub polls: u32,
}

pub struct CloneJob<'a> {
    config: &'a ValidatedConfig,
    host: &'a dyn StagingHost,
    provider: &'a dyn CloningProvider,
    state: CloneState,
    history: Vec<CloneState>,
    job_id: Option<JobId>,
}

impl<'a> CloneJob<'a> {
    pub fn new(
        config: &'a ValidatedConfig,
        host: &'a dyn StagingHost,
        provider: &'a dyn CloningProvider,
    ) -> Self {
        Self {
            config,
            host,
            provider,
            state: CloneState::Created,
            history: vec![CloneState::Created],
            job_id: None,
        }
    }

    pub fn state(&self) -> &CloneState {
        &self.state
    }

    /// Every state the job has passed through, oldest first.
    pub fn history(&self) -> &[CloneState] {
        &self.history
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// Run the job to a terminal state.
    ///
    /// Returns `CloneError::Timeout` when the poll budget runs out and
    /// `CloneError::Provider` when the provider reports the job failed. A job
    /// runs at most once; calling `run` again yields `CloneError::AlreadyRun`.
    pub async fn run(&mut self, narration: &Path, cancel: CancelToken) -> Result<ClonedAudio> {
        if self.state != CloneState::Created {
            return Err(CloneError::AlreadyRun);
        }

        let result = self.drive(narration, cancel).await;

        match &result {
            Ok(_) => self.transition(CloneState::Ready),
            Err(CloneError::Timeout { .. }) => self.transition(CloneState::TimedOut),
            Err(e) => self.transition(CloneState::Failed(e.to_string())),
        }

        result
    }

    async fn drive(&mut self, narration: &Path, mut cancel: CancelToken) -> Result<ClonedAudio> {
        let bytes = read_narration(narration).await?;
        let file_name = narration
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "narration.wav".to_string());

        let config = self.config;
        let host = self.host;
        let provider = self.provider;
        let retry = &config.transport_retry;
        let (bytes, file_name) = (&bytes, file_name.as_str());

        self.transition(CloneState::Uploading);
        let source_url = tokio::select! {
            res = retry.run("staging upload", move || host.upload(bytes.to_vec(), file_name)) => res?,
            _ = cancel.cancelled() => return Err(CloneError::Cancelled),
        };
        log::info!("Staged narration on {} at {}", host.name(), source_url);

        self.transition(CloneState::Submitted);
        // Not retried: a lost response may still have created a paid job.
        let job_id = tokio::select! {
            res = provider.submit(&source_url, &config.voice_id) => res?,
            _ = cancel.cancelled() => return Err(CloneError::Cancelled),
        };
        log::info!("{} accepted cloning job {}", provider.name(), job_id);
        self.job_id = Some(job_id.clone());

        let max = config.max_poll_attempts;
        self.transition(CloneState::Polling { attempt: 0 });

        for attempt in 1..=max {
            self.state = CloneState::Polling { attempt };

            let status = tokio::select! {
                res = provider.poll(&job_id) => res,
                _ = cancel.cancelled() => return Err(CloneError::Cancelled),
            };

            match status {
                Ok(JobStatus::Ready { result_url }) => {
                    log::info!("Job {} ready after {} polls", job_id, attempt);
                    let result_url = result_url.as_str();
                    let bytes = tokio::select! {
                        res = retry.run("result fetch", move || provider.fetch(result_url)) => res?,
                        _ = cancel.cancelled() => return Err(CloneError::Cancelled),
                    };
                    return Ok(ClonedAudio {
                        job_id,
                        source_url,
                        bytes,
                        polls: attempt,
                    });
                }
                Ok(JobStatus::Failed { message }) => {
                    return Err(CloneError::Provider {
                        message,
                        status_code: None,
                    });
                }
                Ok(JobStatus::Pending) => {
                    log::debug!("Job {} pending (poll {}/{})", job_id, attempt, max);
                }
                Err(e) if is_transient(&e) => {
                    log::warn!("Poll {}/{} for job {} failed: {}", attempt, max, job_id, e);
                }
                Err(e) => return Err(e),
            }

            if attempt < max {
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = cancel.cancelled() => return Err(CloneError::Cancelled),
                }
            }
        }

        Err(CloneError::Timeout { attempts: max })
    }

    fn transition(&mut self, next: CloneState) {
        log::debug!("Clone job: {:?} -> {:?}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }
}

async fn read_narration(path: &Path) -> Result<Vec<u8>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CloneError::NoNarration(format!(
                "{} does not exist",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.is_empty() {
        return Err(CloneError::NoNarration(format!("{} is empty", path.display())));
    }

    Ok(bytes)
}

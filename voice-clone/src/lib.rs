//! Remote voice-cloning client
//!
//! Re-voices a local narration through a remote provider:
//! - stage the narration on a temporary public host
//! - submit a cloning job for a target voice
//! - poll at a fixed interval under a bounded budget
//! - download the finished audio
//!
//! Credentials are validated once, up front, via [`CloneConfig::validate`].

pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod provider;
pub mod providers;
pub mod retry;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use config::{CloneConfig, ValidatedConfig};
pub use error::{CloneError, Result};
pub use job::{CloneJob, CloneState, ClonedAudio};
pub use provider::{CloningProvider, JobId, JobStatus, StagingHost};
pub use providers::{BashUploadHost, MockProvider, MockStagingHost, ResembleProvider, default_backends};
pub use retry::RetryPolicy;

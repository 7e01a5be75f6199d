//! Staging host and cloning provider implementations

mod bashupload;
pub mod mock;
mod resemble;

pub use bashupload::{BashUploadHost, parse_public_url};
pub use mock::{MockProvider, MockStagingHost, PollStep};
pub use resemble::ResembleProvider;

use crate::config::ValidatedConfig;
use crate::error::Result;
use crate::provider::{CloningProvider, StagingHost};

/// Build the default staging host and provider from a validated config.
pub fn default_backends(
    config: &ValidatedConfig,
) -> Result<(Box<dyn StagingHost>, Box<dyn CloningProvider>)> {
    let host = BashUploadHost::new(&config.staging_endpoint)?;
    let provider = ResembleProvider::new(config)?;
    Ok((Box::new(host), Box::new(provider)))
}

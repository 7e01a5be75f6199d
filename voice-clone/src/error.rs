use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloneError {
    #[error("Voice cloning is not configured. Missing: {}", .fields.join(", "))]
    MissingConfig { fields: Vec<String> },

    #[error("Invalid cloning configuration: {0}")]
    InvalidConfig(String),

    #[error("No local narration available: {0}")]
    NoNarration(String),

    #[error("Transport error{}: {message}", status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    Transport {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Provider error{}: {message}", status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    Provider {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Voice cloning timed out after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("Voice cloning was cancelled")]
    Cancelled,

    #[error("This cloning job has already run; create a new one to retry")]
    AlreadyRun,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloneError {
    /// Whether an outer caller may sensibly retry the whole cloning stage.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Configuration problems are reported before any network I/O happens.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingConfig { .. } | Self::InvalidConfig(_))
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: None,
        }
    }

    pub(crate) fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            status_code: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloneError>;

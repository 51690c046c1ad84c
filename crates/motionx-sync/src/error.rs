//! Error taxonomy for client operations. Every variant renders as the
//! message a user would see in a blocking alert.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A server-side credential or endpoint is missing.
    #[error("{0}")]
    Config(String),

    /// Rejected before any network call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Blocked by the recipient's privacy settings, before any network call.
    #[error("{0}")]
    PolicyBlocked(String),

    #[error("You must be signed in")]
    Unauthenticated,

    #[error("You do not have permission to {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Failed to {action}")]
    Write {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to load {what}")]
    Read {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Upload failed: {0}")]
    Upload(String),
}

impl SyncError {
    pub fn write(action: &'static str, source: anyhow::Error) -> Self {
        Self::Write { action, source }
    }

    pub fn read(what: &'static str, source: anyhow::Error) -> Self {
        Self::Read { what, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("File size must be less than {}MB", .limit_bytes / (1024 * 1024))]
    TooLarge { limit_bytes: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File is empty")]
    EmptyFile,

    /// Nothing to submit (no text and no attachment).
    #[error("{0}")]
    Empty(&'static str),

    #[error("You cannot {0} yourself")]
    SelfTarget(&'static str),
}

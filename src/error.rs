use thiserror::Error;

use crate::integrity::IntegrityError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt format: {0}")]
    CorruptFormat(String),

    #[error("Compatibility error: {0}")]
    Compatibility(String),

    /// The reconstructed stream does not match the recorded digest
    #[error("Verification failed: {0}")]
    Verification(IntegrityError),

    #[error("Operation cancelled; output is incomplete")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IntegrityError> for SyncError {
    fn from(err: IntegrityError) -> Self {
        match err {
            // A failed read-back says nothing about the output's content
            IntegrityError::IoError(io) => SyncError::Io(io),
            other => SyncError::Verification(other),
        }
    }
}

impl SyncError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptFormat(message.into())
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, SyncError::CorruptFormat(_))
    }

    pub fn is_compatibility(&self) -> bool {
        matches!(self, SyncError::Compatibility(_))
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, SyncError::Verification(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

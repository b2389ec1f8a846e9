use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("{algorithm} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        algorithm: String,
        /// Hex-encoded digest recorded in the delta
        expected: String,
        /// Hex-encoded digest of the reconstructed stream
        actual: String,
    },

    #[error("Invalid checksum length for {algorithm}: expected {expected} bytes, got {actual}")]
    InvalidChecksumLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;

use serde::{Deserialize, Serialize};

use crate::integrity::error::IntegrityError;

/// Outcome of comparing a stream digest against an expected value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationResult {
    pub success: bool,
    pub algorithm: String,
    pub expected: Vec<u8>,
    pub actual: Vec<u8>,
    /// Number of bytes hashed
    pub bytes_verified: u64,
}

impl VerificationResult {
    pub fn new(algorithm: &str, expected: &[u8], actual: Vec<u8>, bytes_verified: u64) -> Self {
        Self {
            success: expected == actual.as_slice(),
            algorithm: algorithm.to_string(),
            expected: expected.to_vec(),
            actual,
            bytes_verified,
        }
    }

    /// Convert a failed comparison into an error
    pub fn into_result(self) -> Result<Self, IntegrityError> {
        if self.success {
            return Ok(self);
        }
        Err(IntegrityError::ChecksumMismatch {
            algorithm: self.algorithm,
            expected: hex::encode(&self.expected),
            actual: hex::encode(&self.actual),
        })
    }
}

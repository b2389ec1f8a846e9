//! Validated tunables shared by the builders and the applier

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::hash::{RollingChecksum, StrongHash, SupportedAlgorithms};

pub const MIN_CHUNK_SIZE: usize = 128;
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
pub const MAX_CHUNK_SIZE: usize = 31 * 1024;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_LITERAL_RUN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Base-stream block size for signatures
    pub chunk_size: usize,

    /// Strong hash named in signatures and deltas
    pub hash_algorithm: String,

    /// Rolling checksum named in signatures
    pub rolling_checksum_algorithm: String,

    /// Bounded read size for scanning streams
    pub read_buffer_size: usize,

    /// Bounded buffer used when streaming Copy and Data commands
    pub copy_buffer_size: usize,

    /// A pending literal run is flushed as a Data command at this size
    pub max_literal_run: usize,

    /// Skip digest verification after applying a delta
    pub skip_verification: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_algorithm: "XXH64".to_string(),
            rolling_checksum_algorithm: "Adler32V2".to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            max_literal_run: DEFAULT_MAX_LITERAL_RUN,
            skip_verification: false,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;
        if self.read_buffer_size == 0 {
            return Err(SyncError::Configuration("read buffer size must be positive".into()));
        }
        if self.copy_buffer_size == 0 {
            return Err(SyncError::Configuration("copy buffer size must be positive".into()));
        }
        if self.max_literal_run == 0 {
            return Err(SyncError::Configuration("literal run limit must be positive".into()));
        }
        SupportedAlgorithms::hash(&self.hash_algorithm)?;
        SupportedAlgorithms::rolling_checksum(&self.rolling_checksum_algorithm)?;
        Ok(())
    }

    pub fn hash(&self) -> Result<Arc<dyn StrongHash>> {
        SupportedAlgorithms::hash(&self.hash_algorithm)
    }

    pub fn rolling_checksum(&self) -> Result<Arc<dyn RollingChecksum>> {
        SupportedAlgorithms::rolling_checksum(&self.rolling_checksum_algorithm)
    }
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(SyncError::Configuration(format!(
            "Chunk size cannot be less than {}",
            MIN_CHUNK_SIZE
        )));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(SyncError::Configuration(format!(
            "Chunk size cannot exceed {}",
            MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_boundaries() {
        assert!(validate_chunk_size(127).unwrap_err().is_configuration());
        assert!(validate_chunk_size(128).is_ok());
        assert!(validate_chunk_size(2048).is_ok());
        assert!(validate_chunk_size(31744).is_ok());
        assert!(validate_chunk_size(31745).unwrap_err().is_configuration());
    }

    #[test]
    fn test_default_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 2048);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            SyncConfig::from_json(r#"{"chunk_size": 128, "hash_algorithm": "SHA1"}"#).unwrap();
        assert_eq!(config.chunk_size, 128);
        assert_eq!(config.hash_algorithm, "SHA1");
        assert_eq!(config.rolling_checksum_algorithm, "Adler32V2");
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(SyncConfig::from_json(r#"{"chunk_size": 64}"#).unwrap_err().is_configuration());
        assert!(SyncConfig::from_json(r#"{"hash_algorithm": "CRC32"}"#)
            .unwrap_err()
            .is_compatibility());
        assert!(SyncConfig::from_json("not json").unwrap_err().is_configuration());
        assert!(SyncConfig::from_json(r#"{"copy_buffer_size": 0}"#)
            .unwrap_err()
            .is_configuration());
    }
}

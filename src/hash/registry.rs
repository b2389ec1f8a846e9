//! Name-keyed factories for the algorithms a signature or delta may name.
//!
//! An unknown name means the blob was produced by a newer or foreign tool,
//! which is reported as a compatibility error rather than corruption.

use std::sync::Arc;

use super::rolling::{Adler32, Adler32V2, RollingChecksum};
use super::strong::{Blake3Hash, Md5Hash, Sha1Hash, StrongHash, XxHash64};
use crate::error::{Result, SyncError};

pub struct SupportedAlgorithms;

impl SupportedAlgorithms {
    pub const HASH_NAMES: [&'static str; 4] = ["XXH64", "SHA1", "MD5", "BLAKE3"];
    pub const ROLLING_NAMES: [&'static str; 2] = ["Adler32", "Adler32V2"];

    pub fn hash(name: &str) -> Result<Arc<dyn StrongHash>> {
        match name {
            "XXH64" => Ok(Arc::new(XxHash64)),
            "SHA1" => Ok(Arc::new(Sha1Hash)),
            "MD5" => Ok(Arc::new(Md5Hash)),
            "BLAKE3" => Ok(Arc::new(Blake3Hash)),
            other => Err(SyncError::Compatibility(format!(
                "The hash algorithm '{}' is not supported",
                other
            ))),
        }
    }

    pub fn rolling_checksum(name: &str) -> Result<Arc<dyn RollingChecksum>> {
        match name {
            "Adler32" => Ok(Arc::new(Adler32)),
            "Adler32V2" => Ok(Arc::new(Adler32V2)),
            other => Err(SyncError::Compatibility(format!(
                "The rolling checksum algorithm '{}' is not supported",
                other
            ))),
        }
    }

    pub fn default_hash() -> Arc<dyn StrongHash> {
        Arc::new(XxHash64)
    }

    pub fn default_rolling_checksum() -> Arc<dyn RollingChecksum> {
        Arc::new(Adler32V2)
    }

    /// Digest recorded for the whole base stream in current-format signatures
    pub fn base_file_hash() -> Arc<dyn StrongHash> {
        Arc::new(Md5Hash)
    }
}

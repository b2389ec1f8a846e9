use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::{RollingChecksum, StrongHash, SupportedAlgorithms};

/// Which wire layout a signature was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatType {
    /// Current layout with a JSON metadata block
    FastRsync,
    /// Legacy Octodiff layout, no base-stream digest
    Octodiff,
}

/// Signature for a single base-stream chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSignature {
    /// Byte offset in the base stream
    pub start_offset: u64,
    /// Chunk length (may be less than the chunk size for the last chunk)
    pub length: u16,
    /// Weak rolling checksum
    pub rolling_checksum: u32,
    /// Strong hash of the chunk bytes
    pub hash: Vec<u8>,
}

impl ChunkSignature {
    pub fn new(
        start_offset: u64,
        data: &[u8],
        hash: &dyn StrongHash,
        rolling: &dyn RollingChecksum,
    ) -> Self {
        Self {
            start_offset,
            length: data.len() as u16,
            rolling_checksum: rolling.calculate(data),
            hash: hash.compute(data),
        }
    }

    /// Verify if data matches this signature
    pub fn matches(
        &self,
        data: &[u8],
        hash: &dyn StrongHash,
        rolling: &dyn RollingChecksum,
    ) -> bool {
        if data.len() != self.length as usize {
            return false;
        }

        // Weak check first, strong hash is definitive
        if rolling.calculate(data) != self.rolling_checksum {
            return false;
        }
        hash.compute(data) == self.hash
    }

    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length as u64
    }
}

/// Metadata block of a signature.
///
/// Serialized as the JSON block of the current format; legacy signatures
/// carry only the two algorithm names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMetadata {
    pub chunk_hash_algorithm: String,
    pub rolling_checksum_algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_file_hash_algorithm: Option<String>,
    /// Base64 digest of the whole base stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_file_hash: Option<String>,
}

/// Decoded header of a signature blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub format: FormatType,
    pub version: u8,
    pub metadata: SignatureMetadata,
}

impl SignatureHeader {
    /// Resolve the chunk hash and rolling checksum the metadata names.
    ///
    /// The base-file digest is informational, so its algorithm name is not
    /// resolved.
    pub fn algorithms(&self) -> Result<(Arc<dyn StrongHash>, Arc<dyn RollingChecksum>)> {
        let metadata = &self.metadata;
        let hash = SupportedAlgorithms::hash(&metadata.chunk_hash_algorithm)?;
        let rolling = SupportedAlgorithms::rolling_checksum(&metadata.rolling_checksum_algorithm)?;
        Ok((hash, rolling))
    }
}

/// Complete signature of a base stream.
///
/// Never mutated after construction, so one instance can back any number of
/// concurrent matchers.
#[derive(Clone)]
pub struct Signature {
    pub header: SignatureHeader,
    pub hash_algorithm: Arc<dyn StrongHash>,
    pub rolling_checksum: Arc<dyn RollingChecksum>,
    pub chunks: Vec<ChunkSignature>,
}

impl Signature {
    pub fn format(&self) -> FormatType {
        self.header.format
    }

    pub fn metadata(&self) -> &SignatureMetadata {
        &self.header.metadata
    }

    /// Check if the signature has no chunks (empty base stream)
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Length of the longest chunk, i.e. the block size the base was cut with
    pub fn chunk_size(&self) -> usize {
        self.chunks.iter().map(|c| c.length as usize).max().unwrap_or(0)
    }

    /// Length of the base stream the chunks cover
    pub fn base_length(&self) -> u64 {
        self.chunks.last().map(|c| c.end_offset()).unwrap_or(0)
    }

    /// Build a lookup table for fast weak hash matching
    pub fn build_lookup(&self) -> SignatureLookup<'_> {
        let mut lookup: HashMap<u32, Vec<usize>> = HashMap::new();

        for (idx, chunk) in self.chunks.iter().enumerate() {
            lookup.entry(chunk.rolling_checksum).or_default().push(idx);
        }

        SignatureLookup {
            signature: self,
            weak_lookup: lookup,
        }
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("header", &self.header)
            .field("hash_algorithm", &self.hash_algorithm.name())
            .field("rolling_checksum", &self.rolling_checksum.name())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Lookup structure for fast block matching
pub struct SignatureLookup<'a> {
    signature: &'a Signature,
    weak_lookup: HashMap<u32, Vec<usize>>,
}

impl<'a> SignatureLookup<'a> {
    /// Find chunks matching the given weak hash
    pub fn find_weak_matches(&self, weak_hash: u32) -> Option<&[usize]> {
        self.weak_lookup.get(&weak_hash).map(Vec::as_slice)
    }

    pub fn get_chunk(&self, idx: usize) -> Option<&'a ChunkSignature> {
        self.signature.chunks.get(idx)
    }

    pub fn signature(&self) -> &'a Signature {
        self.signature
    }

    /// Find a chunk whose checksum, length and strong hash all match `window`
    pub fn find_match(&self, weak_hash: u32, window: &[u8]) -> Option<&'a ChunkSignature> {
        let candidates = self.find_weak_matches(weak_hash)?;
        let mut strong: Option<Vec<u8>> = None;

        for &idx in candidates {
            let chunk = &self.signature.chunks[idx];
            if chunk.length as usize != window.len() {
                continue;
            }
            // Hash lazily, only once a same-length candidate exists
            let digest =
                strong.get_or_insert_with(|| self.signature.hash_algorithm.compute(window));
            if *digest == chunk.hash {
                return Some(chunk);
            }
        }
        None
    }
}

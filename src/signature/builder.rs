//! Signature generation for delta transfer
//!
//! The base stream is cut into fixed-size chunks in one forward pass. Each
//! chunk gets a weak rolling checksum and a strong hash, and the whole stream
//! is fingerprinted along the way.

use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{validate_chunk_size, SyncConfig, DEFAULT_CHUNK_SIZE, DEFAULT_READ_BUFFER_SIZE};
use crate::error::{Result, SyncError};
use crate::format::VERSION;
use crate::hash::{RollingChecksum, StrongHash, StrongHasher, SupportedAlgorithms};
use crate::progress::{CancellationFlag, Progress, ProgressOperation};
use crate::signature::types::{
    ChunkSignature, FormatType, Signature, SignatureHeader, SignatureMetadata,
};

/// Splits a byte stream into chunk signatures as bytes arrive
pub struct Chunker {
    chunk_size: usize,
    hash: Arc<dyn StrongHash>,
    rolling: Arc<dyn RollingChecksum>,
    base_hasher: Box<dyn StrongHasher>,
    pending: Vec<u8>,
    offset: u64,
    chunks: Vec<ChunkSignature>,
}

impl Chunker {
    pub fn new(
        chunk_size: usize,
        hash: Arc<dyn StrongHash>,
        rolling: Arc<dyn RollingChecksum>,
    ) -> Self {
        Self {
            chunk_size,
            hash,
            rolling,
            base_hasher: SupportedAlgorithms::base_file_hash().hasher(),
            pending: Vec::with_capacity(chunk_size),
            offset: 0,
            chunks: Vec::new(),
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.offset + self.pending.len() as u64
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn feed(&mut self, mut data: &[u8]) {
        self.base_hasher.update(data);

        while !data.is_empty() {
            if self.pending.is_empty() && data.len() >= self.chunk_size {
                // Whole chunk available, hash it in place
                let (chunk, rest) = data.split_at(self.chunk_size);
                self.push_chunk_from(chunk);
                data = rest;
                continue;
            }

            let take = (self.chunk_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.chunk_size {
                let chunk = std::mem::take(&mut self.pending);
                self.push_chunk_from(&chunk);
                self.pending = chunk;
                self.pending.clear();
            }
        }
    }

    fn push_chunk_from(&mut self, data: &[u8]) {
        let chunk =
            ChunkSignature::new(self.offset, data, self.hash.as_ref(), self.rolling.as_ref());
        self.offset += data.len() as u64;
        self.chunks.push(chunk);
    }

    /// Flush the trailing short chunk and assemble the signature
    pub fn finish(mut self) -> Signature {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.push_chunk_from(&tail);
        }

        let base_hash = SupportedAlgorithms::base_file_hash();
        let base_digest = self.base_hasher.finalize();

        Signature {
            header: SignatureHeader {
                format: FormatType::FastRsync,
                version: VERSION,
                metadata: SignatureMetadata {
                    chunk_hash_algorithm: self.hash.name().to_string(),
                    rolling_checksum_algorithm: self.rolling.name().to_string(),
                    base_file_hash_algorithm: Some(base_hash.name().to_string()),
                    base_file_hash: Some(BASE64.encode(base_digest)),
                },
            },
            hash_algorithm: self.hash,
            rolling_checksum: self.rolling,
            chunks: self.chunks,
        }
    }
}

/// Builder for base-stream signatures
#[derive(Clone)]
pub struct SignatureBuilder {
    chunk_size: usize,
    hash: Arc<dyn StrongHash>,
    rolling: Arc<dyn RollingChecksum>,
    read_buffer_size: usize,
    progress: Progress,
    cancellation: CancellationFlag,
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBuilder {
    /// Create a new signature builder with default chunk size and algorithms
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash: SupportedAlgorithms::default_hash(),
            rolling: SupportedAlgorithms::default_rolling_checksum(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            progress: Progress::none(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size,
            hash: config.hash()?,
            rolling: config.rolling_checksum()?,
            read_buffer_size: config.read_buffer_size,
            ..Self::new()
        })
    }

    /// Set the chunk size, rejected outside `[128, 31744]`
    pub fn chunk_size(mut self, size: usize) -> Result<Self> {
        validate_chunk_size(size)?;
        self.chunk_size = size;
        Ok(self)
    }

    pub fn hash_algorithm(mut self, hash: Arc<dyn StrongHash>) -> Self {
        self.hash = hash;
        self
    }

    pub fn rolling_checksum(mut self, rolling: Arc<dyn RollingChecksum>) -> Self {
        self.rolling = rolling;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::Configuration("read buffer size must be positive".into()));
        }
        self.read_buffer_size = size;
        Ok(self)
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    fn chunker(&self) -> Chunker {
        Chunker::new(self.chunk_size, self.hash.clone(), self.rolling.clone())
    }

    /// Build signature from a byte slice
    pub fn build_from_bytes(&self, data: &[u8]) -> Result<Signature> {
        let mut chunker = self.chunker();
        for piece in data.chunks(self.read_buffer_size) {
            self.cancellation.check()?;
            chunker.feed(piece);
            self.report(&chunker, Some(data.len() as u64));
        }
        Ok(self.complete(chunker))
    }

    /// Build signature from a forward-only reader.
    ///
    /// Progress totals are unknown here; [`SignatureBuilder::build_from_bytes`]
    /// reports the slice length.
    pub fn build<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Signature> {
        tracing::debug!(
            chunk_size = self.chunk_size,
            hash = self.hash.name(),
            "building signature"
        );

        let mut chunker = self.chunker();
        let mut buffer = vec![0u8; self.read_buffer_size];
        loop {
            self.cancellation.check()?;
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            chunker.feed(&buffer[..n]);
            self.report(&chunker, None);
        }
        Ok(self.complete(chunker))
    }

    /// Async counterpart of [`SignatureBuilder::build`]
    pub async fn build_async<R: AsyncRead + Unpin + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Result<Signature> {
        tracing::debug!(
            chunk_size = self.chunk_size,
            hash = self.hash.name(),
            "building signature"
        );

        let mut chunker = self.chunker();
        let mut buffer = vec![0u8; self.read_buffer_size];
        loop {
            self.cancellation.check()?;
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            chunker.feed(&buffer[..n]);
            self.report(&chunker, None);
        }
        Ok(self.complete(chunker))
    }

    fn report(&self, chunker: &Chunker, total: Option<u64>) {
        self.progress
            .report(ProgressOperation::BuildingSignatures, chunker.position(), total);
    }

    fn complete(&self, chunker: Chunker) -> Signature {
        let signature = chunker.finish();
        tracing::debug!(
            chunks = signature.chunk_count(),
            base_length = signature.base_length(),
            "signature built"
        );
        signature
    }
}

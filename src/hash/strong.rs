//! Strong content digests used to confirm weak-checksum hits and to
//! fingerprint whole streams.

use digest::Digest;
use std::io::Read;

const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental digest state
pub trait StrongHasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// A pluggable strong hash algorithm
pub trait StrongHash: Send + Sync {
    /// Name persisted in signature and delta metadata
    fn name(&self) -> &'static str;

    /// Digest size in bytes
    fn digest_length(&self) -> usize;

    /// Start an incremental digest
    fn hasher(&self) -> Box<dyn StrongHasher>;

    /// Digest of a byte window
    fn compute(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest of everything remaining in `reader`
    fn compute_reader(&self, reader: &mut dyn Read) -> std::io::Result<Vec<u8>> {
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

/// Fast non-cryptographic XXH64 (seed 0, little-endian output)
#[derive(Debug, Clone, Copy, Default)]
pub struct XxHash64;

struct XxHash64Hasher(xxhash_rust::xxh64::Xxh64);

impl StrongHasher for XxHash64Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.digest().to_le_bytes().to_vec()
    }
}

impl StrongHash for XxHash64 {
    fn name(&self) -> &'static str {
        "XXH64"
    }

    fn digest_length(&self) -> usize {
        8
    }

    fn hasher(&self) -> Box<dyn StrongHasher> {
        Box::new(XxHash64Hasher(xxhash_rust::xxh64::Xxh64::new(0)))
    }

    fn compute(&self, data: &[u8]) -> Vec<u8> {
        xxhash_rust::xxh64::xxh64(data, 0).to_le_bytes().to_vec()
    }
}

/// Adapter for any RustCrypto `Digest`
struct DigestHasher<D>(D);

impl<D: Digest + Send> StrongHasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        Digest::finalize(self.0).to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Hash;

impl StrongHash for Sha1Hash {
    fn name(&self) -> &'static str {
        "SHA1"
    }

    fn digest_length(&self) -> usize {
        20
    }

    fn hasher(&self) -> Box<dyn StrongHasher> {
        Box::new(DigestHasher(sha1::Sha1::new()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hash;

impl StrongHash for Md5Hash {
    fn name(&self) -> &'static str {
        "MD5"
    }

    fn digest_length(&self) -> usize {
        16
    }

    fn hasher(&self) -> Box<dyn StrongHasher> {
        Box::new(DigestHasher(md5::Md5::new()))
    }
}

/// BLAKE3, 256-bit output
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hash;

struct Blake3Hasher(blake3::Hasher);

impl StrongHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().as_bytes().to_vec()
    }
}

impl StrongHash for Blake3Hash {
    fn name(&self) -> &'static str {
        "BLAKE3"
    }

    fn digest_length(&self) -> usize {
        32
    }

    fn hasher(&self) -> Box<dyn StrongHasher> {
        Box::new(Blake3Hasher(blake3::Hasher::new()))
    }

    fn compute(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}

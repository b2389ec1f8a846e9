use std::io::Read;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::hash::StrongHash;
use crate::integrity::error::{IntegrityError, IntegrityResult};
use crate::integrity::types::VerificationResult;

const VERIFY_BUFFER_SIZE: usize = 64 * 1024;

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Verify a byte slice against an expected digest
    pub fn verify_bytes(
        hash: &dyn StrongHash,
        expected: &[u8],
        data: &[u8],
    ) -> IntegrityResult<VerificationResult> {
        Self::check_length(hash, expected)?;
        let actual = hash.compute(data);
        Ok(VerificationResult::new(hash.name(), expected, actual, data.len() as u64))
    }

    /// Hash everything remaining in `reader` and compare (streaming)
    pub fn verify_stream<R: Read + ?Sized>(
        hash: &dyn StrongHash,
        expected: &[u8],
        reader: &mut R,
    ) -> IntegrityResult<VerificationResult> {
        Self::check_length(hash, expected)?;

        let mut hasher = hash.hasher();
        let mut buffer = vec![0u8; VERIFY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            total += n as u64;
        }

        Ok(VerificationResult::new(hash.name(), expected, hasher.finalize(), total))
    }

    /// Async counterpart of [`IntegrityVerifier::verify_stream`]
    pub async fn verify_stream_async<R: AsyncRead + Unpin + ?Sized>(
        hash: &dyn StrongHash,
        expected: &[u8],
        reader: &mut R,
    ) -> IntegrityResult<VerificationResult> {
        Self::check_length(hash, expected)?;

        let mut hasher = hash.hasher();
        let mut buffer = vec![0u8; VERIFY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            total += n as u64;
        }

        Ok(VerificationResult::new(hash.name(), expected, hasher.finalize(), total))
    }

    fn check_length(hash: &dyn StrongHash, expected: &[u8]) -> IntegrityResult<()> {
        if expected.len() != hash.digest_length() {
            return Err(IntegrityError::InvalidChecksumLength {
                algorithm: hash.name().to_string(),
                expected: hash.digest_length(),
                actual: expected.len(),
            });
        }
        Ok(())
    }
}

//! Reconstruct a new stream from a base stream and a delta
//!
//! Copy commands seek the base stream, stream the range through a bounded
//! buffer, and put the base cursor back where it was. Data payloads are
//! streamed in bounded chunks as they are decoded.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::config::{SyncConfig, DEFAULT_COPY_BUFFER_SIZE};
use crate::delta::codec::{AsyncDeltaReader, DeltaEvent, DeltaReader};
use crate::delta::types::{DeltaMetadata, DeltaStats};
use crate::error::{Result, SyncError};
use crate::integrity::{IntegrityVerifier, VerificationResult};
use crate::progress::{CancellationFlag, Progress, ProgressOperation};

/// Outcome of applying a delta
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub metadata: DeltaMetadata,
    pub stats: DeltaStats,
    /// Present when the output was verified
    pub verification: Option<VerificationResult>,
}

impl ApplyOutcome {
    pub fn bytes_written(&self) -> u64 {
        self.stats.output_size()
    }
}

#[derive(Debug, Clone)]
pub struct DeltaApplier {
    copy_buffer_size: usize,
    skip_verification: bool,
    progress: Progress,
    cancellation: CancellationFlag,
}

impl Default for DeltaApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaApplier {
    pub fn new() -> Self {
        Self {
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            skip_verification: false,
            progress: Progress::none(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            copy_buffer_size: config.copy_buffer_size,
            skip_verification: config.skip_verification,
            ..Self::new()
        })
    }

    pub fn copy_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::Configuration("copy buffer size must be positive".into()));
        }
        self.copy_buffer_size = size;
        Ok(self)
    }

    pub fn skip_verification(mut self, skip: bool) -> Self {
        self.skip_verification = skip;
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    /// Apply an encoded delta, writing the reconstruction to `sink`.
    ///
    /// Does not verify the output; see [`DeltaApplier::apply_and_verify`].
    /// Progress positions count delta bytes consumed; the total is unknown
    /// for a forward-only delta stream.
    pub fn apply<B, D, W>(&self, base: &mut B, delta: &mut D, sink: &mut W) -> Result<ApplyOutcome>
    where
        B: Read + Seek + ?Sized,
        D: Read + ?Sized,
        W: Write + ?Sized,
    {
        self.apply_with_total(base, delta, sink, None)
    }

    fn apply_with_total<B, D, W>(
        &self,
        base: &mut B,
        delta: &mut D,
        sink: &mut W,
        total: Option<u64>,
    ) -> Result<ApplyOutcome>
    where
        B: Read + Seek + ?Sized,
        D: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut reader = DeltaReader::with_buffer_size(delta, self.copy_buffer_size);
        let metadata = reader.metadata()?.clone();
        tracing::debug!(hash = %metadata.hash_algorithm, ?total, "applying delta");

        let mut stats = DeltaStats {
            encoded_size: metadata.encoded_size(),
            ..DeltaStats::default()
        };
        let mut buffer = vec![0u8; self.copy_buffer_size];

        loop {
            self.cancellation.check()?;
            let Some(event) = reader.next_event()? else {
                break;
            };
            match event {
                DeltaEvent::Copy { base_offset, length } => {
                    copy_range(base, sink, base_offset, length, &mut buffer)?;
                    record_copy(&mut stats, length);
                }
                DeltaEvent::Data { chunk, last } => {
                    sink.write_all(&chunk)?;
                    record_data(&mut stats, chunk.len(), last);
                }
            }
            self.progress
                .report(ProgressOperation::ApplyingDelta, stats.encoded_size, total);
        }
        sink.flush()?;

        tracing::debug!(%stats, "delta applied");
        Ok(ApplyOutcome {
            metadata,
            stats,
            verification: None,
        })
    }

    /// Apply, then re-read the sink and check its digest against the delta
    pub fn apply_and_verify<B, D, W>(
        &self,
        base: &mut B,
        delta: &mut D,
        sink: &mut W,
    ) -> Result<ApplyOutcome>
    where
        B: Read + Seek + ?Sized,
        D: Read + ?Sized,
        W: Read + Write + Seek + ?Sized,
    {
        self.apply_and_verify_with_total(base, delta, sink, None)
    }

    fn apply_and_verify_with_total<B, D, W>(
        &self,
        base: &mut B,
        delta: &mut D,
        sink: &mut W,
        total: Option<u64>,
    ) -> Result<ApplyOutcome>
    where
        B: Read + Seek + ?Sized,
        D: Read + ?Sized,
        W: Read + Write + Seek + ?Sized,
    {
        let start = sink.stream_position()?;
        let mut outcome = self.apply_with_total(base, delta, sink, total)?;

        if self.skip_verification {
            tracing::warn!("skipping verification of the reconstructed stream");
            return Ok(outcome);
        }

        sink.seek(SeekFrom::Start(start))?;
        let hash = outcome.metadata.hash()?;
        let expected = &outcome.metadata.expected_hash;
        let result =
            IntegrityVerifier::verify_stream(hash.as_ref(), expected, sink)?.into_result()?;
        outcome.verification = Some(result);
        Ok(outcome)
    }

    /// Apply a delta to in-memory buffers and verify the result
    pub fn apply_bytes(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        let mut sink = Cursor::new(Vec::new());
        self.apply_and_verify_with_total(
            &mut Cursor::new(base),
            &mut Cursor::new(delta),
            &mut sink,
            Some(delta.len() as u64),
        )?;
        Ok(sink.into_inner())
    }

    /// Async counterpart of [`DeltaApplier::apply`]
    pub async fn apply_async<B, D, W>(
        &self,
        base: &mut B,
        delta: &mut D,
        sink: &mut W,
    ) -> Result<ApplyOutcome>
    where
        B: AsyncRead + AsyncSeek + Unpin + ?Sized,
        D: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut reader = AsyncDeltaReader::with_buffer_size(delta, self.copy_buffer_size);
        let metadata = reader.metadata().await?.clone();
        tracing::debug!(hash = %metadata.hash_algorithm, "applying delta");

        let mut stats = DeltaStats {
            encoded_size: metadata.encoded_size(),
            ..DeltaStats::default()
        };
        let mut buffer = vec![0u8; self.copy_buffer_size];

        loop {
            self.cancellation.check()?;
            let Some(event) = reader.next_event().await? else {
                break;
            };
            match event {
                DeltaEvent::Copy { base_offset, length } => {
                    copy_range_async(base, sink, base_offset, length, &mut buffer).await?;
                    record_copy(&mut stats, length);
                }
                DeltaEvent::Data { chunk, last } => {
                    sink.write_all(&chunk).await?;
                    record_data(&mut stats, chunk.len(), last);
                }
            }
            self.progress
                .report(ProgressOperation::ApplyingDelta, stats.encoded_size, None);
        }
        sink.flush().await?;

        tracing::debug!(%stats, "delta applied");
        Ok(ApplyOutcome {
            metadata,
            stats,
            verification: None,
        })
    }

    /// Async counterpart of [`DeltaApplier::apply_and_verify`]
    pub async fn apply_and_verify_async<B, D, W>(
        &self,
        base: &mut B,
        delta: &mut D,
        sink: &mut W,
    ) -> Result<ApplyOutcome>
    where
        B: AsyncRead + AsyncSeek + Unpin + ?Sized,
        D: AsyncRead + Unpin + ?Sized,
        W: AsyncRead + AsyncWrite + AsyncSeek + Unpin + ?Sized,
    {
        let start = sink.stream_position().await?;
        let mut outcome = self.apply_async(base, delta, sink).await?;

        if self.skip_verification {
            tracing::warn!("skipping verification of the reconstructed stream");
            return Ok(outcome);
        }

        sink.seek(SeekFrom::Start(start)).await?;
        let hash = outcome.metadata.hash()?;
        let expected = &outcome.metadata.expected_hash;
        let result = IntegrityVerifier::verify_stream_async(hash.as_ref(), expected, sink)
            .await?
            .into_result()?;
        outcome.verification = Some(result);
        Ok(outcome)
    }
}

fn record_copy(stats: &mut DeltaStats, length: u64) {
    stats.copied_bytes += length;
    stats.copy_commands += 1;
    stats.encoded_size += 17;
}

fn record_data(stats: &mut DeltaStats, chunk_len: usize, last: bool) {
    stats.literal_bytes += chunk_len as u64;
    stats.encoded_size += chunk_len as u64;
    if last {
        stats.data_commands += 1;
        stats.encoded_size += 9;
    }
}

/// Copy a base range to `sink`; the base cursor is restored on every exit
fn copy_range<B, W>(
    base: &mut B,
    sink: &mut W,
    offset: u64,
    length: u64,
    buffer: &mut [u8],
) -> Result<()>
where
    B: Read + Seek + ?Sized,
    W: Write + ?Sized,
{
    let restore = base.stream_position()?;
    let copied = stream_range(base, sink, offset, length, buffer);
    let restored = base.seek(SeekFrom::Start(restore));
    copied?;
    restored?;
    Ok(())
}

fn stream_range<B, W>(
    base: &mut B,
    sink: &mut W,
    offset: u64,
    length: u64,
    buffer: &mut [u8],
) -> Result<()>
where
    B: Read + Seek + ?Sized,
    W: Write + ?Sized,
{
    base.seek(SeekFrom::Start(offset))?;

    let mut remaining = length;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = base.read(&mut buffer[..want])?;
        if n == 0 {
            return Err(past_end(offset, length));
        }
        sink.write_all(&buffer[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

async fn copy_range_async<B, W>(
    base: &mut B,
    sink: &mut W,
    offset: u64,
    length: u64,
    buffer: &mut [u8],
) -> Result<()>
where
    B: AsyncRead + AsyncSeek + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let restore = base.stream_position().await?;
    let copied = stream_range_async(base, sink, offset, length, buffer).await;
    let restored = base.seek(SeekFrom::Start(restore)).await;
    copied?;
    restored?;
    Ok(())
}

async fn stream_range_async<B, W>(
    base: &mut B,
    sink: &mut W,
    offset: u64,
    length: u64,
    buffer: &mut [u8],
) -> Result<()>
where
    B: AsyncRead + AsyncSeek + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    base.seek(SeekFrom::Start(offset)).await?;

    let mut remaining = length;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = base.read(&mut buffer[..want]).await?;
        if n == 0 {
            return Err(past_end(offset, length));
        }
        sink.write_all(&buffer[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

fn past_end(offset: u64, length: u64) -> SyncError {
    SyncError::corrupt(format!(
        "copy of {} bytes at offset {} runs past the end of the base stream",
        length, offset
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{Delta, DeltaBuilder, DeltaCommand, DeltaWriter};
    use crate::progress::ProgressReport;
    use crate::signature::SignatureBuilder;
    use std::sync::{Arc, Mutex};

    /// Sink that accepts writes but cannot be read back
    struct WriteOnlySink(Cursor<Vec<u8>>);

    impl Read for WriteOnlySink {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk read failed"))
        }
    }

    impl Write for WriteOnlySink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::io::Write::write(&mut self.0, buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            std::io::Write::flush(&mut self.0)
        }
    }

    impl Seek for WriteOnlySink {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            std::io::Seek::seek(&mut self.0, pos)
        }
    }

    fn delta_blob(base: &[u8], new: &[u8]) -> Vec<u8> {
        let sig = SignatureBuilder::new()
            .chunk_size(256)
            .unwrap()
            .build_from_bytes(base)
            .unwrap();
        let delta = DeltaBuilder::new().build_from_bytes(new, &sig).unwrap();
        DeltaWriter::encode(&delta)
    }

    fn sample() -> (Vec<u8>, Vec<u8>) {
        let base: Vec<u8> = (0..20_000u32).map(|i| (i % 241) as u8 ^ (i / 241) as u8).collect();
        let mut new = base[4_000..12_000].to_vec();
        new.extend_from_slice(b"fresh bytes in the middle");
        new.extend_from_slice(&base[..3_000]);
        (base, new)
    }

    #[test]
    fn test_apply_reconstructs() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let applier = DeltaApplier::new().copy_buffer_size(100).unwrap();
        assert_eq!(applier.apply_bytes(&base, &blob).unwrap(), new);
    }

    #[test]
    fn test_outcome_stats() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let mut sink = Cursor::new(Vec::new());
        let outcome = DeltaApplier::new()
            .apply_and_verify(&mut Cursor::new(&base), &mut Cursor::new(&blob), &mut sink)
            .unwrap();

        assert_eq!(outcome.bytes_written(), new.len() as u64);
        assert_eq!(outcome.stats.encoded_size, blob.len() as u64);
        assert!(outcome.verification.unwrap().success);
    }

    #[test]
    fn test_base_cursor_is_restored() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let mut base_stream = Cursor::new(&base);
        base_stream.set_position(1234);
        DeltaApplier::new()
            .apply(&mut base_stream, &mut Cursor::new(&blob), &mut Vec::<u8>::new())
            .unwrap();
        assert_eq!(base_stream.position(), 1234);
    }

    #[test]
    fn test_verification_failure() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        // Same length, different content: copies pull the wrong bytes
        let mut other_base = base.clone();
        other_base[4_500] ^= 0xFF;

        let err = DeltaApplier::new().apply_bytes(&other_base, &blob).unwrap_err();
        assert!(err.is_verification());

        let skipped = DeltaApplier::new()
            .skip_verification(true)
            .apply_bytes(&other_base, &blob)
            .unwrap();
        assert_ne!(skipped, new);
    }

    #[test]
    fn test_copy_past_end_of_base() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let err = DeltaApplier::new().apply_bytes(&base[..5_000], &blob).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_base_cursor_is_restored_after_failed_copy() {
        let base = vec![7u8; 1000];
        let blob = DeltaWriter::encode(&Delta {
            metadata: DeltaMetadata::new("XXH64", vec![0u8; 8]),
            commands: vec![DeltaCommand::copy(0, 4000)],
        });

        let mut base_stream = Cursor::new(&base);
        base_stream.set_position(10);
        let err = DeltaApplier::new()
            .apply(&mut base_stream, &mut Cursor::new(&blob), &mut Vec::<u8>::new())
            .unwrap_err();

        assert!(err.is_corrupt());
        assert_eq!(base_stream.position(), 10);
    }

    #[test]
    fn test_sink_read_failure_is_io_error() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let mut sink = WriteOnlySink(Cursor::new(Vec::new()));
        let err = DeltaApplier::new()
            .apply_and_verify(&mut Cursor::new(&base), &mut Cursor::new(&blob), &mut sink)
            .unwrap_err();

        assert!(matches!(err, SyncError::Io(_)), "{}", err);
        assert!(!err.is_verification());
        assert_eq!(sink.0.into_inner(), new);
    }

    #[test]
    fn test_apply_bytes_reports_delta_total() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(Arc::new(move |r: ProgressReport| {
            sink.lock().unwrap().push(r);
        }));
        DeltaApplier::new().progress(progress).apply_bytes(&base, &blob).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.total == Some(blob.len() as u64)));
        assert_eq!(seen.last().map(|r| r.current_position), Some(blob.len() as u64));
    }

    #[test]
    fn test_cancelled_apply() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);
        let flag = CancellationFlag::new();
        flag.cancel();

        let result = DeltaApplier::new().cancellation(flag).apply_bytes(&base, &blob);
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_async_apply_matches_sync() {
        let (base, new) = sample();
        let blob = delta_blob(&base, &new);

        let mut sink = Cursor::new(Vec::new());
        let outcome = DeltaApplier::new()
            .copy_buffer_size(512)
            .unwrap()
            .apply_and_verify_async(
                &mut Cursor::new(base.clone()),
                &mut Cursor::new(blob.clone()),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(sink.into_inner(), new);
        assert!(outcome.verification.is_some());
    }

    #[tokio::test]
    async fn test_async_base_cursor_is_restored_after_failed_copy() {
        let blob = DeltaWriter::encode(&Delta {
            metadata: DeltaMetadata::new("XXH64", vec![0u8; 8]),
            commands: vec![DeltaCommand::copy(500, 4000)],
        });

        let mut base_stream = Cursor::new(vec![7u8; 1000]);
        base_stream.set_position(10);
        let err = DeltaApplier::new()
            .apply_async(&mut base_stream, &mut Cursor::new(blob), &mut Vec::<u8>::new())
            .await
            .unwrap_err();

        assert!(err.is_corrupt());
        assert_eq!(base_stream.position(), 10);
    }
}

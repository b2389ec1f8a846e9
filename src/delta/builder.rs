use std::io::{Read, Seek, SeekFrom, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::config::{SyncConfig, DEFAULT_MAX_LITERAL_RUN, DEFAULT_READ_BUFFER_SIZE};
use crate::delta::codec::DeltaWriter;
use crate::delta::matcher::DeltaMatcher;
use crate::delta::types::{Delta, DeltaCommand, DeltaMetadata, DeltaStats};
use crate::error::{Result, SyncError};
use crate::progress::{CancellationFlag, Progress, ProgressOperation};
use crate::signature::Signature;

/// Builder for computing deltas against a base signature
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    read_buffer_size: usize,
    max_literal_run: usize,
    progress: Progress,
    cancellation: CancellationFlag,
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_literal_run: DEFAULT_MAX_LITERAL_RUN,
            progress: Progress::none(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            read_buffer_size: config.read_buffer_size,
            max_literal_run: config.max_literal_run,
            ..Self::new()
        })
    }

    pub fn read_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::Configuration("read buffer size must be positive".into()));
        }
        self.read_buffer_size = size;
        Ok(self)
    }

    /// Pending literal bytes are flushed as a Data command at this size
    pub fn max_literal_run(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::Configuration("literal run limit must be positive".into()));
        }
        self.max_literal_run = size;
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

    /// Compute a delta held in memory; the new stream is read once, forward only
    pub fn build<R: Read + ?Sized>(&self, new: &mut R, signature: &Signature) -> Result<Delta> {
        tracing::debug!(chunks = signature.chunk_count(), "building delta");

        let mut hasher = signature.hash_algorithm.hasher();
        let mut matcher = DeltaMatcher::new(signature, self.max_literal_run);
        let mut commands = Vec::new();
        let mut buffer = vec![0u8; self.read_buffer_size];

        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            matcher.feed(&buffer[..n], &mut commands);
            self.progress
                .report(ProgressOperation::BuildingDelta, matcher.position(), None);
        }
        matcher.finish(&mut commands);

        let delta = Delta {
            metadata: DeltaMetadata::new(signature.hash_algorithm.name(), hasher.finalize()),
            commands,
        };
        tracing::debug!(stats = %delta.stats(), "delta built");
        Ok(delta)
    }

    /// Build a delta directly from bytes
    pub fn build_from_bytes(&self, new: &[u8], signature: &Signature) -> Result<Delta> {
        self.build(&mut std::io::Cursor::new(new), signature)
    }

    /// Async counterpart of [`DeltaBuilder::build`]
    pub async fn build_async<R: AsyncRead + Unpin + ?Sized>(
        &self,
        new: &mut R,
        signature: &Signature,
    ) -> Result<Delta> {
        tracing::debug!(chunks = signature.chunk_count(), "building delta");

        let mut hasher = signature.hash_algorithm.hasher();
        let mut matcher = DeltaMatcher::new(signature, self.max_literal_run);
        let mut commands = Vec::new();
        let mut buffer = vec![0u8; self.read_buffer_size];

        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            matcher.feed(&buffer[..n], &mut commands);
            self.progress
                .report(ProgressOperation::BuildingDelta, matcher.position(), None);
        }
        matcher.finish(&mut commands);

        let delta = Delta {
            metadata: DeltaMetadata::new(signature.hash_algorithm.name(), hasher.finalize()),
            commands,
        };
        tracing::debug!(stats = %delta.stats(), "delta built");
        Ok(delta)
    }

    /// Stream an encoded delta to `writer` without holding the commands.
    ///
    /// The digest goes in the header, so the new stream is hashed first and
    /// then rewound for matching.
    pub fn build_to_writer<R, W>(
        &self,
        new: &mut R,
        signature: &Signature,
        writer: &mut W,
    ) -> Result<DeltaStats>
    where
        R: Read + Seek + ?Sized,
        W: Write + ?Sized,
    {
        let start = new.stream_position()?;
        let total = new.seek(SeekFrom::End(0))? - start;
        new.seek(SeekFrom::Start(start))?;

        let hash = signature.hash_algorithm.clone();
        let mut hasher = hash.hasher();
        let mut buffer = vec![0u8; self.read_buffer_size];
        let mut hashed = 0u64;
        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            hashed += n as u64;
            self.progress
                .report(ProgressOperation::HashingFile, hashed, Some(total));
        }
        new.seek(SeekFrom::Start(start))?;

        let metadata = DeltaMetadata::new(hash.name(), hasher.finalize());
        let mut header = Vec::new();
        DeltaWriter::encode_metadata(&metadata, &mut header);
        writer.write_all(&header)?;

        let mut stats = DeltaStats {
            encoded_size: metadata.encoded_size(),
            ..DeltaStats::default()
        };
        let mut matcher = DeltaMatcher::new(signature, self.max_literal_run);
        let mut commands = Vec::new();
        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            matcher.feed(&buffer[..n], &mut commands);
            write_commands(&mut commands, writer, &mut stats)?;
            self.progress
                .report(ProgressOperation::BuildingDelta, matcher.position(), Some(total));
        }
        matcher.finish(&mut commands);
        write_commands(&mut commands, writer, &mut stats)?;
        writer.flush()?;

        tracing::debug!(%stats, "delta written");
        Ok(stats)
    }

    /// Async counterpart of [`DeltaBuilder::build_to_writer`]
    pub async fn build_to_writer_async<R, W>(
        &self,
        new: &mut R,
        signature: &Signature,
        writer: &mut W,
    ) -> Result<DeltaStats>
    where
        R: AsyncRead + AsyncSeek + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let start = new.stream_position().await?;
        let total = new.seek(SeekFrom::End(0)).await? - start;
        new.seek(SeekFrom::Start(start)).await?;

        let hash = signature.hash_algorithm.clone();
        let mut hasher = hash.hasher();
        let mut buffer = vec![0u8; self.read_buffer_size];
        let mut hashed = 0u64;
        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            hashed += n as u64;
            self.progress
                .report(ProgressOperation::HashingFile, hashed, Some(total));
        }
        new.seek(SeekFrom::Start(start)).await?;

        let metadata = DeltaMetadata::new(hash.name(), hasher.finalize());
        let mut header = Vec::new();
        DeltaWriter::encode_metadata(&metadata, &mut header);
        writer.write_all(&header).await?;

        let mut stats = DeltaStats {
            encoded_size: metadata.encoded_size(),
            ..DeltaStats::default()
        };
        let mut matcher = DeltaMatcher::new(signature, self.max_literal_run);
        let mut commands = Vec::new();
        loop {
            self.cancellation.check()?;
            let n = new.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            matcher.feed(&buffer[..n], &mut commands);
            for command in commands.drain(..) {
                DeltaWriter::write_command_async(&command, writer).await?;
                stats.record(&command);
            }
            self.progress
                .report(ProgressOperation::BuildingDelta, matcher.position(), Some(total));
        }
        matcher.finish(&mut commands);
        for command in commands.drain(..) {
            DeltaWriter::write_command_async(&command, writer).await?;
            stats.record(&command);
        }
        writer.flush().await?;

        tracing::debug!(%stats, "delta written");
        Ok(stats)
    }
}

fn write_commands<W: Write + ?Sized>(
    commands: &mut Vec<DeltaCommand>,
    writer: &mut W,
    stats: &mut DeltaStats,
) -> Result<()> {
    for command in commands.drain(..) {
        DeltaWriter::write_command(&command, writer)?;
        stats.record(&command);
    }
    Ok(())
}

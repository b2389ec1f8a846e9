//! Binary encoding of deltas.
//!
//! `OCTODELTA | version | hash name | digest length | digest | >>> | commands`.
//! Commands run to end of stream; Copy is `0x60 start len`, Data is
//! `0x80 len bytes`, all integers little-endian i64.

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::delta::types::{Delta, DeltaCommand, DeltaMetadata};
use crate::error::{Result, SyncError};
use crate::format::{
    self, Parse, SliceReader, COPY_COMMAND, DATA_COMMAND, DELTA_MAGIC, END_OF_METADATA, VERSION,
};
use crate::hash::{StrongHash, SupportedAlgorithms};

const DEFAULT_DECODE_CHUNK: usize = 64 * 1024;

pub struct DeltaWriter;

impl DeltaWriter {
    pub fn encode_metadata(metadata: &DeltaMetadata, out: &mut Vec<u8>) {
        out.extend_from_slice(DELTA_MAGIC);
        out.push(VERSION);
        format::write_string(out, &metadata.hash_algorithm);
        out.extend_from_slice(&(metadata.expected_hash.len() as i32).to_le_bytes());
        out.extend_from_slice(&metadata.expected_hash);
        out.extend_from_slice(END_OF_METADATA);
    }

    /// Tag and fixed fields; a Data payload is written separately
    pub fn encode_command_header(command: &DeltaCommand, out: &mut Vec<u8>) {
        match command {
            DeltaCommand::Copy { base_offset, length } => {
                out.push(COPY_COMMAND);
                out.extend_from_slice(&(*base_offset as i64).to_le_bytes());
                out.extend_from_slice(&(*length as i64).to_le_bytes());
            }
            DeltaCommand::Data { payload } => {
                out.push(DATA_COMMAND);
                out.extend_from_slice(&(payload.len() as i64).to_le_bytes());
            }
        }
    }

    pub fn encode_command(command: &DeltaCommand, out: &mut Vec<u8>) {
        Self::encode_command_header(command, out);
        if let DeltaCommand::Data { payload } = command {
            out.extend_from_slice(payload);
        }
    }

    pub fn encode(delta: &Delta) -> Vec<u8> {
        let mut out = Vec::with_capacity(delta.encoded_size() as usize);
        Self::encode_metadata(&delta.metadata, &mut out);
        for command in &delta.commands {
            Self::encode_command(command, &mut out);
        }
        out
    }

    /// Write one command without copying its payload into a scratch buffer
    pub fn write_command<W: Write + ?Sized>(command: &DeltaCommand, writer: &mut W) -> Result<()> {
        let mut header = Vec::with_capacity(17);
        Self::encode_command_header(command, &mut header);
        writer.write_all(&header)?;
        if let DeltaCommand::Data { payload } = command {
            writer.write_all(payload)?;
        }
        Ok(())
    }

    pub async fn write_command_async<W: AsyncWrite + Unpin + ?Sized>(
        command: &DeltaCommand,
        writer: &mut W,
    ) -> Result<()> {
        let mut header = Vec::with_capacity(17);
        Self::encode_command_header(command, &mut header);
        writer.write_all(&header).await?;
        if let DeltaCommand::Data { payload } = command {
            writer.write_all(payload).await?;
        }
        Ok(())
    }

    pub fn write<W: Write + ?Sized>(delta: &Delta, writer: &mut W) -> Result<()> {
        let mut header = Vec::new();
        Self::encode_metadata(&delta.metadata, &mut header);
        writer.write_all(&header)?;
        for command in &delta.commands {
            Self::write_command(command, writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub async fn write_async<W>(delta: &Delta, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut header = Vec::new();
        Self::encode_metadata(&delta.metadata, &mut header);
        writer.write_all(&header).await?;
        for command in &delta.commands {
            Self::write_command_async(command, writer).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Parse the delta header; the named hash must be known
pub fn parse_delta_header(reader: &mut SliceReader<'_>) -> Parse<DeltaMetadata> {
    reader.expect(DELTA_MAGIC, "The delta file appears to be corrupt")?;

    let version = reader.u8()?;
    if version != VERSION {
        return Err(SyncError::corrupt(format!(
            "The delta file uses an unsupported format version {}",
            version
        ))
        .into());
    }

    let hash_algorithm = reader.string()?;
    let hash = SupportedAlgorithms::hash(&hash_algorithm)?;

    let digest_length = reader.i32()?;
    if digest_length < 0 || digest_length as usize != hash.digest_length() {
        return Err(SyncError::corrupt(format!(
            "invalid {} digest length {} in delta header",
            hash_algorithm, digest_length
        ))
        .into());
    }
    let expected_hash = reader.take(digest_length as usize)?.to_vec();

    reader.expect(END_OF_METADATA, "The delta file appears to be corrupt")?;

    Ok(DeltaMetadata {
        version,
        hash_algorithm,
        expected_hash,
    })
}

/// Unit of decoded delta content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    Copy { base_offset: u64, length: u64 },
    /// Part of a Data payload; `last` marks the end of the command
    Data { chunk: Bytes, last: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Tag,
    CopyArgs,
    DataLength,
    DataBody { remaining: u64 },
}

/// Incremental command decoder.
///
/// Bytes are fed as they arrive; Data payloads come out in chunks of at
/// most `max_chunk` bytes, so a large literal run is never held whole.
#[derive(Debug)]
pub struct CommandDecoder {
    state: DecodeState,
    buffer: BytesMut,
    max_chunk: usize,
    commands: usize,
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_CHUNK)
    }
}

impl CommandDecoder {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            state: DecodeState::Tag,
            buffer: BytesMut::new(),
            max_chunk: max_chunk.max(1),
            commands: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Commands started so far
    pub fn commands(&self) -> usize {
        self.commands
    }

    /// Next event, or `None` when more input is needed
    pub fn next_event(&mut self) -> Result<Option<DeltaEvent>> {
        loop {
            match self.state {
                DecodeState::Tag => {
                    if !self.buffer.has_remaining() {
                        return Ok(None);
                    }
                    self.state = match self.buffer.get_u8() {
                        COPY_COMMAND => DecodeState::CopyArgs,
                        DATA_COMMAND => DecodeState::DataLength,
                        other => {
                            return Err(SyncError::corrupt(format!(
                                "unknown delta command tag 0x{:02x}",
                                other
                            )))
                        }
                    };
                    self.commands += 1;
                }
                DecodeState::CopyArgs => {
                    if self.buffer.remaining() < 16 {
                        return Ok(None);
                    }
                    let start = self.buffer.get_i64_le();
                    let length = self.buffer.get_i64_le();
                    if start < 0 || length < 0 {
                        return Err(SyncError::corrupt(format!(
                            "invalid copy command: start {}, length {}",
                            start, length
                        )));
                    }
                    self.state = DecodeState::Tag;
                    return Ok(Some(DeltaEvent::Copy {
                        base_offset: start as u64,
                        length: length as u64,
                    }));
                }
                DecodeState::DataLength => {
                    if self.buffer.remaining() < 8 {
                        return Ok(None);
                    }
                    let length = self.buffer.get_i64_le();
                    if length < 0 {
                        return Err(SyncError::corrupt(format!(
                            "invalid data command length {}",
                            length
                        )));
                    }
                    if length == 0 {
                        self.state = DecodeState::Tag;
                        return Ok(Some(DeltaEvent::Data {
                            chunk: Bytes::new(),
                            last: true,
                        }));
                    }
                    self.state = DecodeState::DataBody {
                        remaining: length as u64,
                    };
                }
                DecodeState::DataBody { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take =
                        (remaining.min(self.max_chunk as u64) as usize).min(self.buffer.len());
                    let chunk = self.buffer.split_to(take).freeze();
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        DecodeState::Tag
                    } else {
                        DecodeState::DataBody { remaining }
                    };
                    return Ok(Some(DeltaEvent::Data {
                        chunk,
                        last: remaining == 0,
                    }));
                }
            }
        }
    }

    /// Input has ended; fail if a command was cut short
    pub fn finish(&self) -> Result<()> {
        if self.state != DecodeState::Tag || !self.buffer.is_empty() {
            return Err(SyncError::corrupt("The delta file appears to be truncated"));
        }
        Ok(())
    }
}

/// Collects streamed events back into whole commands
#[derive(Debug, Default)]
struct CommandCollector {
    pending: Option<BytesMut>,
}

impl CommandCollector {
    fn push(&mut self, event: DeltaEvent) -> Option<DeltaCommand> {
        match event {
            DeltaEvent::Copy { base_offset, length } => {
                Some(DeltaCommand::Copy { base_offset, length })
            }
            DeltaEvent::Data { chunk, last } => {
                let payload = match self.pending.take() {
                    None if last => return Some(DeltaCommand::Data { payload: chunk }),
                    None => {
                        let mut buf = BytesMut::with_capacity(chunk.len());
                        buf.extend_from_slice(&chunk);
                        buf
                    }
                    Some(mut buf) => {
                        buf.extend_from_slice(&chunk);
                        buf
                    }
                };
                if last {
                    Some(DeltaCommand::Data {
                        payload: payload.freeze(),
                    })
                } else {
                    self.pending = Some(payload);
                    None
                }
            }
        }
    }
}

/// Delta reader over a blocking stream.
///
/// Metadata is parsed on first access, so the expected digest can be fetched
/// without scanning the commands.
pub struct DeltaReader<R> {
    reader: R,
    metadata: Option<DeltaMetadata>,
    decoder: CommandDecoder,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: Read> DeltaReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, DEFAULT_DECODE_CHUNK)
    }

    /// `buffer_size` bounds both reads and emitted Data chunks
    pub fn with_buffer_size(reader: R, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            reader,
            metadata: None,
            decoder: CommandDecoder::new(buffer_size),
            buffer: vec![0u8; buffer_size],
            finished: false,
        }
    }

    pub fn metadata(&mut self) -> Result<&DeltaMetadata> {
        if self.metadata.is_none() {
            let (metadata, leftover) = format::read_header(&mut self.reader, parse_delta_header)?;
            self.decoder.feed(&leftover);
            self.metadata = Some(metadata);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| SyncError::corrupt("delta metadata unavailable"))
    }

    pub fn expected_hash(&mut self) -> Result<Vec<u8>> {
        Ok(self.metadata()?.expected_hash.clone())
    }

    pub fn hash_algorithm(&mut self) -> Result<Arc<dyn StrongHash>> {
        self.metadata()?.hash()
    }

    pub fn commands_read(&self) -> usize {
        self.decoder.commands()
    }

    /// Next decoded event; `None` at a clean end of stream
    pub fn next_event(&mut self) -> Result<Option<DeltaEvent>> {
        self.metadata()?;
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            let n = self.reader.read(&mut self.buffer)?;
            if n == 0 {
                self.decoder.finish()?;
                self.finished = true;
                return Ok(None);
            }
            self.decoder.feed(&self.buffer[..n]);
        }
    }

    /// Read the remaining commands into memory
    pub fn read_delta(mut self) -> Result<Delta> {
        let metadata = self.metadata()?.clone();
        let mut collector = CommandCollector::default();
        let mut commands = Vec::new();
        while let Some(event) = self.next_event()? {
            if let Some(command) = collector.push(event) {
                commands.push(command);
            }
        }
        Ok(Delta { metadata, commands })
    }
}

impl DeltaReader<std::io::Cursor<Vec<u8>>> {
    /// Decode a complete in-memory delta blob
    pub fn decode(data: &[u8]) -> Result<Delta> {
        DeltaReader::new(std::io::Cursor::new(data.to_vec())).read_delta()
    }
}

/// Async counterpart of [`DeltaReader`]
pub struct AsyncDeltaReader<R> {
    reader: R,
    metadata: Option<DeltaMetadata>,
    decoder: CommandDecoder,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> AsyncDeltaReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, DEFAULT_DECODE_CHUNK)
    }

    pub fn with_buffer_size(reader: R, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            reader,
            metadata: None,
            decoder: CommandDecoder::new(buffer_size),
            buffer: vec![0u8; buffer_size],
            finished: false,
        }
    }

    pub async fn metadata(&mut self) -> Result<&DeltaMetadata> {
        if self.metadata.is_none() {
            let (metadata, leftover) =
                format::read_header_async(&mut self.reader, parse_delta_header).await?;
            self.decoder.feed(&leftover);
            self.metadata = Some(metadata);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| SyncError::corrupt("delta metadata unavailable"))
    }

    pub fn commands_read(&self) -> usize {
        self.decoder.commands()
    }

    pub async fn next_event(&mut self) -> Result<Option<DeltaEvent>> {
        self.metadata().await?;
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            let n = self.reader.read(&mut self.buffer).await?;
            if n == 0 {
                self.decoder.finish()?;
                self.finished = true;
                return Ok(None);
            }
            self.decoder.feed(&self.buffer[..n]);
        }
    }

    pub async fn read_delta(mut self) -> Result<Delta> {
        let metadata = self.metadata().await?.clone();
        let mut collector = CommandCollector::default();
        let mut commands = Vec::new();
        while let Some(event) = self.next_event().await? {
            if let Some(command) = collector.push(event) {
                commands.push(command);
            }
        }
        Ok(Delta { metadata, commands })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::XxHash64;
    use std::io::Cursor;

    fn sample_delta() -> Delta {
        Delta {
            metadata: DeltaMetadata::new("XXH64", XxHash64.compute(b"whatever")),
            commands: vec![
                DeltaCommand::copy(0, 2048),
                DeltaCommand::data(vec![0xAB; 5000]),
                DeltaCommand::copy(4096, 128),
                DeltaCommand::data(Vec::new()),
            ],
        }
    }

    #[test]
    fn test_wire_layout() {
        let delta = Delta {
            metadata: DeltaMetadata::new("XXH64", vec![1, 2, 3, 4, 5, 6, 7, 8]),
            commands: vec![DeltaCommand::copy(16, 32), DeltaCommand::data(b"hi".to_vec())],
        };
        let blob = DeltaWriter::encode(&delta);

        let mut expected = b"OCTODELTA\x01\x05XXH64".to_vec();
        expected.extend_from_slice(&8i32.to_le_bytes());
        expected.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        expected.extend_from_slice(b">>>");
        expected.push(0x60);
        expected.extend_from_slice(&16i64.to_le_bytes());
        expected.extend_from_slice(&32i64.to_le_bytes());
        expected.push(0x80);
        expected.extend_from_slice(&2i64.to_le_bytes());
        expected.extend_from_slice(b"hi");

        assert_eq!(blob, expected);
        assert_eq!(blob.len() as u64, delta.encoded_size());
    }

    #[test]
    fn test_decode_matches_encode() {
        let delta = sample_delta();
        let blob = DeltaWriter::encode(&delta);
        assert_eq!(DeltaReader::decode(&blob).unwrap(), delta);
    }

    #[test]
    fn test_small_buffers_split_data() {
        let delta = sample_delta();
        let blob = DeltaWriter::encode(&delta);

        let mut reader = DeltaReader::with_buffer_size(Cursor::new(blob), 100);
        let mut max_chunk = 0;
        while let Some(event) = reader.next_event().unwrap() {
            if let DeltaEvent::Data { chunk, .. } = event {
                max_chunk = max_chunk.max(chunk.len());
            }
        }
        assert!(max_chunk <= 100);
        assert_eq!(reader.commands_read(), 4);
    }

    #[test]
    fn test_metadata_is_lazy() {
        let mut blob = DeltaWriter::encode(&sample_delta());
        // Garbage after the header is not touched by a metadata read
        blob.extend_from_slice(&[0xFF; 4]);

        let mut reader = DeltaReader::new(Cursor::new(blob));
        assert_eq!(reader.metadata().unwrap().hash_algorithm, "XXH64");
        assert_eq!(reader.expected_hash().unwrap(), XxHash64.compute(b"whatever"));
        assert_eq!(reader.hash_algorithm().unwrap().name(), "XXH64");
    }

    #[test]
    fn test_corrupt_deltas() {
        let blob = DeltaWriter::encode(&sample_delta());

        let mut bad_magic = blob.clone();
        bad_magic[0] = b'X';
        assert!(DeltaReader::decode(&bad_magic).unwrap_err().is_corrupt());

        let mut bad_tag = DeltaWriter::encode(&Delta {
            commands: vec![DeltaCommand::copy(0, 1)],
            ..sample_delta()
        });
        let tag_at = bad_tag.len() - 17;
        bad_tag[tag_at] = 0x42;
        assert!(DeltaReader::decode(&bad_tag).unwrap_err().is_corrupt());

        let truncated = &blob[..blob.len() - 100];
        assert!(DeltaReader::decode(truncated).unwrap_err().is_corrupt());

        let header_only = &blob[..20];
        assert!(DeltaReader::decode(header_only).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_negative_length_is_corrupt() {
        let mut blob = Vec::new();
        DeltaWriter::encode_metadata(&sample_delta().metadata, &mut blob);
        blob.push(0x60);
        blob.extend_from_slice(&0i64.to_le_bytes());
        blob.extend_from_slice(&(-5i64).to_le_bytes());
        assert!(DeltaReader::decode(&blob).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_unknown_hash_is_compatibility_error() {
        let mut blob = b"OCTODELTA\x01\x05CRC64".to_vec();
        blob.extend_from_slice(&8i32.to_le_bytes());
        blob.extend_from_slice(&[0u8; 8]);
        blob.extend_from_slice(b">>>");
        assert!(DeltaReader::decode(&blob).unwrap_err().is_compatibility());
    }

    #[tokio::test]
    async fn test_async_reader_matches_sync() {
        let delta = sample_delta();
        let mut blob = Vec::new();
        DeltaWriter::write_async(&delta, &mut blob).await.unwrap();
        assert_eq!(blob, DeltaWriter::encode(&delta));

        let decoded = AsyncDeltaReader::with_buffer_size(Cursor::new(blob), 333)
            .read_delta()
            .await
            .unwrap();
        assert_eq!(decoded, delta);
    }
}

//! Binary encoding of signatures.
//!
//! Two layouts share one chunk-record table and differ in their metadata:
//! the current one stores a JSON block, the legacy Octodiff one stores two
//! length-prefixed algorithm names.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SyncError};
use crate::format::{
    self, Parse, SliceReader, END_OF_METADATA, LEGACY_SIGNATURE_MAGIC, SIGNATURE_MAGIC, VERSION,
};
use crate::signature::types::{
    ChunkSignature, FormatType, Signature, SignatureHeader, SignatureMetadata,
};

/// Size of one chunk record for a given digest length
pub fn record_size(digest_length: usize) -> usize {
    2 + 4 + digest_length
}

pub struct SignatureWriter;

impl SignatureWriter {
    /// Encode in the current layout
    pub fn encode(signature: &Signature) -> Result<Vec<u8>> {
        let mut out = Self::encode_metadata(signature)?;
        Self::encode_chunks(signature, &mut out);
        Ok(out)
    }

    /// Encode in the legacy Octodiff layout (no base-stream digest)
    pub fn encode_legacy(signature: &Signature) -> Vec<u8> {
        let metadata = signature.metadata();
        let mut out = Vec::new();
        out.extend_from_slice(LEGACY_SIGNATURE_MAGIC);
        out.push(VERSION);
        format::write_string(&mut out, &metadata.chunk_hash_algorithm);
        format::write_string(&mut out, &metadata.rolling_checksum_algorithm);
        out.extend_from_slice(END_OF_METADATA);
        Self::encode_chunks(signature, &mut out);
        out
    }

    fn encode_metadata(signature: &Signature) -> Result<Vec<u8>> {
        let json = serde_json::to_string(signature.metadata())
            .map_err(|e| {
                SyncError::corrupt(format!("cannot serialize signature metadata: {}", e))
            })?;

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE_MAGIC);
        out.push(VERSION);
        format::write_string(&mut out, &json);
        out.extend_from_slice(END_OF_METADATA);
        Ok(out)
    }

    fn encode_chunks(signature: &Signature, out: &mut Vec<u8>) {
        out.reserve(signature.chunks.len() * record_size(signature.hash_algorithm.digest_length()));
        for chunk in &signature.chunks {
            out.extend_from_slice(&(chunk.length as i16).to_le_bytes());
            out.extend_from_slice(&chunk.rolling_checksum.to_le_bytes());
            out.extend_from_slice(&chunk.hash);
        }
    }

    pub fn write<W: Write + ?Sized>(signature: &Signature, writer: &mut W) -> Result<()> {
        writer.write_all(&Self::encode(signature)?)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_legacy<W: Write + ?Sized>(signature: &Signature, writer: &mut W) -> Result<()> {
        writer.write_all(&Self::encode_legacy(signature))?;
        writer.flush()?;
        Ok(())
    }

    pub async fn write_async<W>(signature: &Signature, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&Self::encode(signature)?).await?;
        writer.flush().await?;
        Ok(())
    }
}

pub struct SignatureReader;

impl SignatureReader {
    /// Parse a signature header, auto-detecting the layout by its magic
    pub fn parse_header(reader: &mut SliceReader<'_>) -> Parse<SignatureHeader> {
        let magic = reader.take(SIGNATURE_MAGIC.len())?;
        let format = if magic == SIGNATURE_MAGIC {
            FormatType::FastRsync
        } else if magic == LEGACY_SIGNATURE_MAGIC {
            FormatType::Octodiff
        } else {
            return Err(SyncError::corrupt("The signature file appears to be corrupt").into());
        };

        let version = reader.u8()?;
        if version != VERSION {
            return Err(SyncError::corrupt(format!(
                "The signature file uses an unsupported format version {}",
                version
            ))
            .into());
        }

        let metadata = match format {
            FormatType::FastRsync => {
                let json = reader.string()?;
                let metadata: SignatureMetadata = serde_json::from_str(&json)
                    .map_err(|e| SyncError::corrupt(format!("invalid signature metadata: {}", e)))?;
                if let Some(digest) = &metadata.base_file_hash {
                    BASE64
                        .decode(digest)
                        .map_err(|_| SyncError::corrupt("base file hash is not valid base64"))?;
                }
                metadata
            }
            FormatType::Octodiff => SignatureMetadata {
                chunk_hash_algorithm: reader.string()?,
                rolling_checksum_algorithm: reader.string()?,
                base_file_hash_algorithm: None,
                base_file_hash: None,
            },
        };

        reader.expect(END_OF_METADATA, "The signature file appears to be corrupt")?;

        Ok(SignatureHeader {
            format,
            version,
            metadata,
        })
    }

    /// Read just the metadata block
    pub fn read_metadata<R: Read + ?Sized>(reader: &mut R) -> Result<SignatureHeader> {
        let (header, _) = format::read_header(reader, Self::parse_header)?;
        Ok(header)
    }

    pub async fn read_metadata_async<R>(reader: &mut R) -> Result<SignatureHeader>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (header, _) = format::read_header_async(reader, Self::parse_header).await?;
        Ok(header)
    }

    /// Read a complete signature: metadata, then the chunk table to end of stream
    pub fn read_signature<R: Read + ?Sized>(reader: &mut R) -> Result<Signature> {
        let (header, mut table) = format::read_header(reader, Self::parse_header)?;
        reader.read_to_end(&mut table)?;
        Self::assemble(header, &table)
    }

    pub async fn read_signature_async<R>(reader: &mut R) -> Result<Signature>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (header, mut table) = format::read_header_async(reader, Self::parse_header).await?;
        reader.read_to_end(&mut table).await?;
        Self::assemble(header, &table)
    }

    /// Decode a complete in-memory signature blob
    pub fn decode(data: &[u8]) -> Result<Signature> {
        let mut cursor = SliceReader::new(data);
        let header = match Self::parse_header(&mut cursor) {
            Ok(header) => header,
            Err(format::ParseStop::Invalid(err)) => return Err(err),
            Err(format::ParseStop::Incomplete) => {
                return Err(SyncError::corrupt("The signature file appears to be truncated"))
            }
        };
        Self::assemble(header, &data[cursor.position()..])
    }

    fn assemble(header: SignatureHeader, table: &[u8]) -> Result<Signature> {
        let (hash_algorithm, rolling_checksum) = header.algorithms()?;
        let digest_length = hash_algorithm.digest_length();
        let size = record_size(digest_length);

        if table.len() % size != 0 {
            return Err(SyncError::corrupt(
                "The signature file appears to be corrupt; at least one chunk has data missing",
            ));
        }

        let mut chunks = Vec::with_capacity(table.len() / size);
        let mut offset = 0u64;
        for record in table.chunks_exact(size) {
            let length = i16::from_le_bytes([record[0], record[1]]);
            if length <= 0 {
                return Err(SyncError::corrupt(format!("invalid chunk length {}", length)));
            }
            let rolling = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);

            chunks.push(ChunkSignature {
                start_offset: offset,
                length: length as u16,
                rolling_checksum: rolling,
                hash: record[6..].to_vec(),
            });
            offset += length as u64;
        }

        tracing::debug!(
            format = ?header.format,
            chunks = chunks.len(),
            hash = hash_algorithm.name(),
            "signature decoded"
        );

        Ok(Signature {
            header,
            hash_algorithm,
            rolling_checksum,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureBuilder;
    use std::io::Cursor;

    /// Octodiff signature of a single 1037-byte chunk
    const LEGACY_SIGNATURE: [u8; 39] = [
        0x4F, 0x43, 0x54, 0x4F, 0x53, 0x49, 0x47, 0x01, 0x05, 0x58, 0x58, 0x48, 0x36,
        0x34, 0x07, 0x41, 0x64, 0x6C, 0x65, 0x72, 0x33, 0x32, 0x3E, 0x3E, 0x3E, 0x0D,
        0x04, 0x2F, 0xFC, 0xF4, 0x6C, 0x7B, 0x52, 0x06, 0x17, 0x0A, 0x90, 0x3D, 0x70,
    ];

    fn sample_signature() -> Signature {
        let data: Vec<u8> = (0..3000u32).map(|i| (i * 13 % 256) as u8).collect();
        SignatureBuilder::new().chunk_size(256).unwrap().build_from_bytes(&data).unwrap()
    }

    #[test]
    fn test_legacy_vector() {
        let sig = SignatureReader::decode(&LEGACY_SIGNATURE).unwrap();

        assert_eq!(sig.format(), FormatType::Octodiff);
        assert_eq!(sig.metadata().chunk_hash_algorithm, "XXH64");
        assert_eq!(sig.metadata().rolling_checksum_algorithm, "Adler32");
        assert_eq!(sig.metadata().base_file_hash, None);
        assert_eq!(sig.chunk_count(), 1);
        assert_eq!(sig.chunks[0].start_offset, 0);
        assert_eq!(sig.chunks[0].length, 1037);
        assert_eq!(sig.chunks[0].rolling_checksum, 0x6CF4_FC2F);
        assert_eq!(sig.chunks[0].hash, vec![0x7B, 0x52, 0x06, 0x17, 0x0A, 0x90, 0x3D, 0x70]);
    }

    #[test]
    fn test_current_format_layout() {
        let sig = sample_signature();
        let blob = SignatureWriter::encode(&sig).unwrap();

        assert_eq!(&blob[..7], b"FRSNCSG");
        assert_eq!(blob[7], 0x01);

        let header = SignatureReader::read_metadata(&mut Cursor::new(&blob)).unwrap();
        assert_eq!(header.format, FormatType::FastRsync);
        assert_eq!(header.metadata, *sig.metadata());
        assert_eq!(header.metadata.base_file_hash_algorithm.as_deref(), Some("MD5"));

        let mut cursor = SliceReader::new(&blob[8..]);
        let json: serde_json::Value = serde_json::from_str(&cursor.string().unwrap()).unwrap();
        assert_eq!(json["chunkHashAlgorithm"], "XXH64");
        assert_eq!(json["rollingChecksumAlgorithm"], "Adler32V2");
    }

    #[test]
    fn test_decode_matches_encode() {
        let sig = sample_signature();
        let blob = SignatureWriter::encode(&sig).unwrap();
        let decoded = SignatureReader::read_signature(&mut Cursor::new(&blob)).unwrap();

        assert_eq!(decoded.chunks, sig.chunks);
        assert_eq!(decoded.header, sig.header);
    }

    #[test]
    fn test_legacy_writer() {
        let sig = sample_signature();
        let blob = SignatureWriter::encode_legacy(&sig);
        assert_eq!(&blob[..7], b"OCTOSIG");

        let decoded = SignatureReader::decode(&blob).unwrap();
        assert_eq!(decoded.format(), FormatType::Octodiff);
        assert_eq!(decoded.chunks, sig.chunks);
    }

    #[test]
    fn test_truncated_table_is_corrupt() {
        let blob = SignatureWriter::encode(&sample_signature()).unwrap();
        let err = SignatureReader::decode(&blob[..blob.len() - 1]).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut blob = SignatureWriter::encode(&sample_signature()).unwrap();
        blob[2] ^= 0xff;
        assert!(SignatureReader::decode(&blob).unwrap_err().is_corrupt());

        let mut blob = SignatureWriter::encode(&sample_signature()).unwrap();
        blob[7] = 0x02;
        assert!(SignatureReader::decode(&blob).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_unknown_algorithm_is_compatibility_error() {
        let mut blob = Vec::new();
        blob.extend_from_slice(LEGACY_SIGNATURE_MAGIC);
        blob.push(VERSION);
        format::write_string(&mut blob, "CRC64");
        format::write_string(&mut blob, "Adler32");
        blob.extend_from_slice(END_OF_METADATA);

        let err = SignatureReader::decode(&blob).unwrap_err();
        assert!(err.is_compatibility());

        // Metadata-only read does not resolve algorithms
        assert!(SignatureReader::read_metadata(&mut Cursor::new(&blob)).is_ok());
    }

    #[test]
    fn test_unknown_base_file_hash_algorithm_is_accepted() {
        let mut sig = sample_signature();
        sig.header.metadata.base_file_hash_algorithm = Some("SHA3-256".to_string());
        let blob = SignatureWriter::encode(&sig).unwrap();

        let decoded = SignatureReader::decode(&blob).unwrap();
        assert_eq!(
            decoded.metadata().base_file_hash_algorithm.as_deref(),
            Some("SHA3-256")
        );
        assert_eq!(decoded.chunks, sig.chunks);
    }

    #[tokio::test]
    async fn test_async_read_matches_sync() {
        let sig = sample_signature();
        let mut blob = Vec::new();
        SignatureWriter::write_async(&sig, &mut blob).await.unwrap();

        let decoded = SignatureReader::read_signature_async(&mut Cursor::new(&blob)).await.unwrap();
        assert_eq!(decoded.chunks, sig.chunks);
    }
}

//! Binary primitives shared by the signature and delta codecs.
//!
//! Headers are parsed from in-memory slices so that the blocking and the
//! tokio drivers feed the same parser: a parser that runs out of input stops
//! with [`ParseStop::Incomplete`] and the driver reads more bytes.

use std::io::Read;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SyncError};

pub const VERSION: u8 = 0x01;
pub const END_OF_METADATA: &[u8; 3] = b">>>";

pub const SIGNATURE_MAGIC: &[u8; 7] = b"FRSNCSG";
pub const LEGACY_SIGNATURE_MAGIC: &[u8; 7] = b"OCTOSIG";
pub const DELTA_MAGIC: &[u8; 9] = b"OCTODELTA";

pub const COPY_COMMAND: u8 = 0x60;
pub const DATA_COMMAND: u8 = 0x80;

/// Longest 7-bit encoded length prefix for a 32-bit value
const MAX_PREFIX_BYTES: usize = 5;

const HEADER_READ_SIZE: usize = 512;

/// Why a slice parser stopped
#[derive(Debug)]
pub enum ParseStop {
    /// More input is required
    Incomplete,
    Invalid(SyncError),
}

impl From<SyncError> for ParseStop {
    fn from(err: SyncError) -> Self {
        ParseStop::Invalid(err)
    }
}

pub type Parse<T> = std::result::Result<T, ParseStop>;

/// Forward cursor over a byte slice
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Parse<&'a [u8]> {
        if self.remaining() < n {
            return Err(ParseStop::Incomplete);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Parse<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i16(&mut self) -> Parse<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Parse<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn i32(&mut self) -> Parse<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn i64(&mut self) -> Parse<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    /// Length prefix in the 7-bit encoding used by .NET `BinaryWriter`
    pub fn seven_bit_len(&mut self) -> Parse<usize> {
        let mut value: u32 = 0;
        for i in 0..MAX_PREFIX_BYTES {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as usize);
            }
        }
        Err(SyncError::corrupt("string length prefix is too long").into())
    }

    pub fn string(&mut self) -> Parse<String> {
        let len = self.seven_bit_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SyncError::corrupt("metadata string is not valid UTF-8").into())
    }

    /// Consume `expected` or fail with `what` as the corruption reason
    pub fn expect(&mut self, expected: &[u8], what: &str) -> Parse<()> {
        let actual = self.take(expected.len())?;
        if actual != expected {
            return Err(SyncError::corrupt(what.to_string()).into());
        }
        Ok(())
    }
}

pub fn write_seven_bit_len(out: &mut Vec<u8>, len: usize) {
    let mut value = len as u32;
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_string(out: &mut Vec<u8>, value: &str) {
    write_seven_bit_len(out, value.len());
    out.extend_from_slice(value.as_bytes());
}

/// Read from `reader` until `parse` succeeds on the accumulated prefix.
///
/// Returns the parsed value and any bytes read past it.
pub fn read_header<R, T, F>(reader: &mut R, parse: F) -> Result<(T, Vec<u8>)>
where
    R: Read + ?Sized,
    F: Fn(&mut SliceReader<'_>) -> Parse<T>,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; HEADER_READ_SIZE];
    loop {
        let mut cursor = SliceReader::new(&buffer);
        match parse(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position();
                return Ok((value, buffer.split_off(consumed)));
            }
            Err(ParseStop::Invalid(err)) => return Err(err),
            Err(ParseStop::Incomplete) => {}
        }

        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(SyncError::corrupt("unexpected end of stream while reading header"));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Async counterpart of [`read_header`]
pub async fn read_header_async<R, T, F>(reader: &mut R, parse: F) -> Result<(T, Vec<u8>)>
where
    R: AsyncRead + Unpin + ?Sized,
    F: Fn(&mut SliceReader<'_>) -> Parse<T>,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; HEADER_READ_SIZE];
    loop {
        let mut cursor = SliceReader::new(&buffer);
        match parse(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position();
                return Ok((value, buffer.split_off(consumed)));
            }
            Err(ParseStop::Invalid(err)) => return Err(err),
            Err(ParseStop::Incomplete) => {}
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(SyncError::corrupt("unexpected end of stream while reading header"));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

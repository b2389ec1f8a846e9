//! Base-stream signatures: chunk records, generation and binary codec

pub mod builder;
pub mod codec;
pub mod types;

pub use builder::{Chunker, SignatureBuilder};
pub use codec::{SignatureReader, SignatureWriter};
pub use types::{
    ChunkSignature, FormatType, Signature, SignatureHeader, SignatureLookup, SignatureMetadata,
};

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::format::VERSION;
use crate::hash::{StrongHash, SupportedAlgorithms};

/// Instruction for reconstructing the new stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaCommand {
    /// Copy `length` bytes of the base stream starting at `base_offset`
    Copy { base_offset: u64, length: u64 },
    /// Emit literal bytes carried in the delta
    Data { payload: Bytes },
}

impl DeltaCommand {
    pub fn copy(base_offset: u64, length: u64) -> Self {
        DeltaCommand::Copy { base_offset, length }
    }

    pub fn data(payload: impl Into<Bytes>) -> Self {
        DeltaCommand::Data {
            payload: payload.into(),
        }
    }

    /// Number of output bytes this command produces
    pub fn output_size(&self) -> u64 {
        match self {
            DeltaCommand::Copy { length, .. } => *length,
            DeltaCommand::Data { payload } => payload.len() as u64,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, DeltaCommand::Copy { .. })
    }

    /// Encoded size: tag byte plus fields
    pub fn encoded_size(&self) -> u64 {
        match self {
            DeltaCommand::Copy { .. } => 1 + 8 + 8,
            DeltaCommand::Data { payload } => 1 + 8 + payload.len() as u64,
        }
    }
}

/// Delta metadata, recorded once ahead of the commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaMetadata {
    pub version: u8,
    /// Strong hash used for the expected digest
    pub hash_algorithm: String,
    /// Digest of the complete new stream
    pub expected_hash: Vec<u8>,
}

impl DeltaMetadata {
    pub fn new(hash_algorithm: &str, expected_hash: Vec<u8>) -> Self {
        Self {
            version: VERSION,
            hash_algorithm: hash_algorithm.to_string(),
            expected_hash,
        }
    }

    pub fn hash(&self) -> Result<Arc<dyn StrongHash>> {
        SupportedAlgorithms::hash(&self.hash_algorithm)
    }

    /// Encoded header size
    pub fn encoded_size(&self) -> u64 {
        let mut prefix = Vec::new();
        crate::format::write_seven_bit_len(&mut prefix, self.hash_algorithm.len());
        (9 + 1 + prefix.len() + self.hash_algorithm.len() + 4 + self.expected_hash.len() + 3) as u64
    }
}

/// A delta held in memory: metadata plus ordered commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub metadata: DeltaMetadata,
    pub commands: Vec<DeltaCommand>,
}

impl Delta {
    /// Length of the stream the commands reconstruct
    pub fn output_size(&self) -> u64 {
        self.commands.iter().map(DeltaCommand::output_size).sum()
    }

    /// Encoded size of the delta blob
    pub fn encoded_size(&self) -> u64 {
        self.metadata.encoded_size()
            + self
                .commands
                .iter()
                .map(DeltaCommand::encoded_size)
                .sum::<u64>()
    }

    /// Count how many bytes are copied vs carried as literals
    pub fn stats(&self) -> DeltaStats {
        let mut stats = DeltaStats {
            encoded_size: self.metadata.encoded_size(),
            ..DeltaStats::default()
        };
        for command in &self.commands {
            stats.record(command);
        }
        stats
    }
}

/// Statistics about a delta
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub copied_bytes: u64,
    pub literal_bytes: u64,
    pub copy_commands: usize,
    pub data_commands: usize,
    pub encoded_size: u64,
}

impl DeltaStats {
    pub fn record(&mut self, command: &DeltaCommand) {
        match command {
            DeltaCommand::Copy { length, .. } => {
                self.copied_bytes += length;
                self.copy_commands += 1;
            }
            DeltaCommand::Data { payload } => {
                self.literal_bytes += payload.len() as u64;
                self.data_commands += 1;
            }
        }
        self.encoded_size += command.encoded_size();
    }

    pub fn output_size(&self) -> u64 {
        self.copied_bytes + self.literal_bytes
    }

    /// Percentage of the new stream copied from the base
    pub fn copy_ratio(&self) -> f64 {
        if self.output_size() == 0 {
            return 0.0;
        }
        self.copied_bytes as f64 / self.output_size() as f64 * 100.0
    }

    /// Bandwidth savings compared to sending the new stream whole
    pub fn savings_ratio(&self) -> f64 {
        if self.output_size() == 0 {
            return 0.0;
        }
        (1.0 - self.encoded_size as f64 / self.output_size() as f64) * 100.0
    }
}

impl std::fmt::Display for DeltaStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Delta: {} copied ({:.1}%), {} literal, {} commands, {} bytes encoded, {:.1}% savings",
            self.copied_bytes,
            self.copy_ratio(),
            self.literal_bytes,
            self.copy_commands + self.data_commands,
            self.encoded_size,
            self.savings_ratio()
        )
    }
}

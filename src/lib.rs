//! Binary differencing in the rsync style.
//!
//! A signature summarizes a base stream as fixed-size chunks. A delta
//! describes a new stream as Copy ranges of the base plus literal Data,
//! found by scanning the new stream with a rolling checksum. Applying the
//! delta to the base reconstructs the new stream, which is then verified
//! against the digest the delta carries.
//!
//! ```no_run
//! use std::fs::File;
//! use deltasync::{DeltaApplier, DeltaBuilder, SignatureBuilder};
//!
//! # fn main() -> deltasync::Result<()> {
//! let signature = SignatureBuilder::new().build(&mut File::open("base.bin")?)?;
//! let mut delta = Vec::new();
//! DeltaBuilder::new().build_to_writer(&mut File::open("new.bin")?, &signature, &mut delta)?;
//!
//! let mut output = File::options()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .truncate(true)
//!     .open("out.bin")?;
//! let mut base = File::open("base.bin")?;
//! DeltaApplier::new().apply_and_verify(&mut base, &mut delta.as_slice(), &mut output)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delta;
pub mod error;
pub mod format;
pub mod hash;
pub mod integrity;
pub mod progress;
pub mod signature;

pub use config::SyncConfig;
pub use delta::{Delta, DeltaApplier, DeltaBuilder, DeltaCommand, DeltaReader, DeltaWriter};
pub use error::{Result, SyncError};
pub use hash::SupportedAlgorithms;
pub use progress::{
    CancellationFlag, Progress, ProgressOperation, ProgressReport, ProgressReporter,
};
pub use signature::{FormatType, Signature, SignatureBuilder, SignatureReader, SignatureWriter};

//! Delta computation and application

pub mod aggregate;
pub mod applier;
pub mod builder;
pub mod codec;
pub mod matcher;
pub mod types;

pub use aggregate::AggregateCopyOperations;
pub use applier::{ApplyOutcome, DeltaApplier};
pub use builder::DeltaBuilder;
pub use codec::{AsyncDeltaReader, CommandDecoder, DeltaEvent, DeltaReader, DeltaWriter};
pub use matcher::DeltaMatcher;
pub use types::{Delta, DeltaCommand, DeltaMetadata, DeltaStats};

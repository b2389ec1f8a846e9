pub mod error;
pub mod types;
pub mod verifier;

pub use error::{IntegrityError, IntegrityResult};
pub use types::VerificationResult;
pub use verifier::IntegrityVerifier;

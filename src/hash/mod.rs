//! Weak rolling checksums and strong digests

pub mod registry;
pub mod rolling;
pub mod strong;

pub use registry::SupportedAlgorithms;
pub use rolling::{Adler32, Adler32V2, RollingChecksum};
pub use strong::{Blake3Hash, Md5Hash, Sha1Hash, StrongHash, StrongHasher, XxHash64};

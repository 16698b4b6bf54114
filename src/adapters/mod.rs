// Adapters layer: concrete object store clients.

pub mod memory;
#[cfg(feature = "aws")]
pub mod s3;

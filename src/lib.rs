pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::cli::{CliConfig, ResolvedConfig};

#[cfg(feature = "aws")]
pub use crate::adapters::s3::AwsS3Client;

pub use crate::adapters::memory::{InMemoryObjectStore, StoreOperation};
pub use crate::config::{S3Settings, UploadConfig};
pub use crate::core::{completion::UploadCompletion, retry::RetryPolicy, upload_stream::S3UploadStream};
pub use crate::domain::model::{CompletedPart, ObjectTarget, UploadMode, UploadOutcome};
pub use crate::domain::ports::ObjectStoreClient;
pub use crate::utils::error::{Result, UploadError};

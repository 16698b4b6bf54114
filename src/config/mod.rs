#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::core::retry::RetryPolicy;
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_aws_region, validate_range, validate_s3_bucket_name, validate_url, Validate,
};
use serde::{Deserialize, Serialize};

/// S3 refuses non-final parts smaller than this.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const MAX_PARTS: usize = 10_000;
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Tuning for a single upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Bytes buffered before a part is dispatched
    pub buffer_size: usize,
    /// Part uploads allowed in flight at once
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Checks the config against S3 service limits. Streams accept any non-zero
/// buffer size, so stores with other limits can still be targeted.
impl Validate for UploadConfig {
    fn validate(&self) -> Result<()> {
        validate_range("buffer_size", self.buffer_size as u64, MIN_PART_SIZE, MAX_PART_SIZE)?;
        validate_range("max_concurrency", self.max_concurrency, 1, 64)?;
        validate_range("max_retries", self.retry.max_retries, 0, 10)?;
        validate_range("initial_retry_delay_ms", self.retry.initial_delay_ms, 0, 60_000)?;

        tracing::debug!("Upload configuration validation passed");
        Ok(())
    }
}

/// Connection settings for the S3 endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint, e.g. MinIO or LocalStack
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl Validate for S3Settings {
    fn validate(&self) -> Result<()> {
        validate_s3_bucket_name("bucket", &self.bucket)?;

        if let Some(region) = &self.region {
            validate_aws_region("region", region)?;
        }

        if let Some(endpoint) = &self.endpoint {
            validate_url("endpoint", endpoint)?;
        }

        tracing::debug!("S3 settings validation passed");
        Ok(())
    }
}

use crate::config::{S3Settings, UploadConfig};
use crate::core::retry::RetryPolicy;
use crate::utils::error::{Result, UploadError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk configuration. Every field is optional so command line flags can
/// fill the gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub s3: Option<S3Section>,
    pub upload: Option<UploadSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Section {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadSection {
    pub buffer_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_retry_delay_ms: Option<u64>,
    pub content_type: Option<String>,
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| UploadError::ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Upload tuning with unset values taken from the defaults.
    pub fn upload_config(&self) -> UploadConfig {
        let defaults = UploadConfig::default();
        let Some(section) = &self.upload else {
            return defaults;
        };

        UploadConfig {
            buffer_size: section.buffer_size.unwrap_or(defaults.buffer_size),
            max_concurrency: section.max_concurrency.unwrap_or(defaults.max_concurrency),
            retry: RetryPolicy::new(
                section.max_retries.unwrap_or(defaults.retry.max_retries),
                section
                    .initial_retry_delay_ms
                    .unwrap_or(defaults.retry.initial_delay_ms),
            ),
        }
    }

    /// Connection settings from the `[s3]` section. The bucket is left empty
    /// when the file does not name one, so a flag can supply it.
    pub fn s3_settings(&self) -> S3Settings {
        let Some(section) = &self.s3 else {
            return S3Settings::default();
        };
        S3Settings {
            bucket: section.bucket.clone().unwrap_or_default(),
            region: section.region.clone(),
            endpoint: section.endpoint.clone(),
            force_path_style: section.force_path_style.unwrap_or(false),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.upload.as_ref()?.content_type.as_deref()
    }
}

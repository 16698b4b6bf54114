use crate::config::toml_config::TomlConfig;
use crate::config::{S3Settings, UploadConfig};
use crate::domain::model::ObjectTarget;
use crate::utils::error::Result;
use crate::utils::validation::{validate_path, validate_required_field, validate_s3_key, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "s3-upload")]
#[command(about = "Stream a file or stdin into an S3 object using multipart upload")]
pub struct CliConfig {
    #[arg(long, help = "Target bucket (overrides the config file)")]
    pub bucket: Option<String>,

    #[arg(long, help = "Target object key")]
    pub key: String,

    #[arg(long, help = "File to upload; reads stdin when omitted")]
    pub file: Option<PathBuf>,

    #[arg(long, help = "TOML config file")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub region: Option<String>,

    #[arg(long, help = "Custom S3 endpoint URL")]
    pub endpoint: Option<String>,

    #[arg(long, help = "Use path-style bucket addressing")]
    pub path_style: bool,

    #[arg(long, help = "Part size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(long)]
    pub max_concurrency: Option<usize>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub content_type: Option<String>,

    #[arg(long, help = "Print the upload outcome as JSON")]
    pub json: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

/// Everything the binary needs, after merging flags over the config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub s3: S3Settings,
    pub upload: UploadConfig,
    pub target: ObjectTarget,
    pub source: Option<PathBuf>,
}

impl CliConfig {
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let file_config = match &self.config {
            Some(path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };
        self.merge(&file_config)
    }

    pub fn merge(&self, file_config: &TomlConfig) -> Result<ResolvedConfig> {
        let mut s3 = file_config.s3_settings();
        if let Some(bucket) = &self.bucket {
            s3.bucket = bucket.clone();
        }
        if self.region.is_some() {
            s3.region = self.region.clone();
        }
        if self.endpoint.is_some() {
            s3.endpoint = self.endpoint.clone();
        }
        s3.force_path_style |= self.path_style;

        let bucket = if s3.bucket.is_empty() { None } else { Some(s3.bucket.clone()) };
        validate_required_field("bucket", &bucket)?;

        let mut upload = file_config.upload_config();
        if let Some(buffer_size) = self.buffer_size {
            upload.buffer_size = buffer_size;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            upload.max_concurrency = max_concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            upload.retry.max_retries = max_retries;
        }

        let mut target = ObjectTarget::new(s3.bucket.clone(), self.key.clone());
        target.content_type = self
            .content_type
            .clone()
            .or_else(|| file_config.content_type().map(str::to_string));

        let resolved = ResolvedConfig {
            s3,
            upload,
            target,
            source: self.file.clone(),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

impl Validate for ResolvedConfig {
    fn validate(&self) -> Result<()> {
        self.s3.validate()?;
        self.upload.validate()?;
        validate_s3_key("key", &self.target.key)?;

        if let Some(source) = &self.source {
            validate_path("file", &source.to_string_lossy())?;
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }
}

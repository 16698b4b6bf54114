use thiserror::Error;

/// Errors are `Clone` so a single failure can be handed to every
/// `UploadCompletion` waiting on the same upload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Stream is closed")]
    Closed,

    #[error("No tokio runtime available to drive uploads")]
    RuntimeUnavailable,

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("{operation} failed: {message}")]
    Storage {
        operation: String,
        message: String,
        retryable: bool,
    },

    #[error("Failed to create multipart upload for s3://{bucket}/{key}: {message}")]
    CreateUploadFailed {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Failed to upload part {part_number}: {message}")]
    PartUploadFailed { part_number: i32, message: String },

    #[error("Failed to complete multipart upload {upload_id}: {message}")]
    CompleteUploadFailed { upload_id: String, message: String },

    #[error("Failed to put object: {message}")]
    PutObjectFailed { message: String },

    #[error("Upload exceeds the limit of {limit} parts")]
    TooManyParts { limit: usize },

    #[error("Upload task failed: {message}")]
    TaskFailed { message: String },

    #[error("Stream was dropped before it was closed")]
    Abandoned,

    #[error("Upload was aborted")]
    Aborted,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("TOML parse error: {0}")]
    TomlError(String),
}

/// Stream errors surface through `std::io::Write`; unwrap them again so
/// callers of `io::copy` and friends see the original variant.
impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<UploadError>()) {
            Some(upload_error) => upload_error.clone(),
            None => UploadError::IoError(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for UploadError {
    fn from(err: toml::de::Error) -> Self {
        UploadError::TomlError(err.to_string())
    }
}

impl From<UploadError> for std::io::Error {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Closed => std::io::Error::new(std::io::ErrorKind::BrokenPipe, err),
            other => std::io::Error::other(other),
        }
    }
}

impl UploadError {
    pub fn storage(operation: &str, message: impl Into<String>, retryable: bool) -> Self {
        UploadError::Storage {
            operation: operation.to_string(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether repeating the failed request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            UploadError::ConfigError { .. }
                | UploadError::InvalidConfigValueError { .. }
                | UploadError::MissingConfigError { .. }
                | UploadError::TomlError(_)
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            UploadError::Closed => "Create a new stream for each object; closed streams reject writes",
            UploadError::RuntimeUnavailable => {
                "Create the stream inside a tokio runtime or pass a runtime handle explicitly"
            }
            UploadError::ConfigError { .. }
            | UploadError::InvalidConfigValueError { .. }
            | UploadError::MissingConfigError { .. }
            | UploadError::TomlError(_) => "Check the configuration file and command line flags",
            UploadError::Storage { retryable: true, .. } => {
                "The storage service reported a transient failure; try again later"
            }
            UploadError::Storage { .. }
            | UploadError::CreateUploadFailed { .. }
            | UploadError::PutObjectFailed { .. } => {
                "Verify bucket name, credentials and permissions for the target object"
            }
            UploadError::PartUploadFailed { .. } | UploadError::CompleteUploadFailed { .. } => {
                "Parts must be at least 5 MiB except the last one; check buffer size and connectivity"
            }
            UploadError::TooManyParts { .. } => "Increase the buffer size so the object fits in fewer parts",
            UploadError::Aborted => "The upload was cancelled; start a new stream to retry",
            UploadError::TaskFailed { .. } | UploadError::Abandoned => {
                "Always close or finish the stream before dropping it"
            }
            UploadError::IoError(_) => "Check that the input is readable",
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

pub mod completion;
pub mod retry;
pub mod upload_stream;

pub use crate::domain::model::{CompletedPart, ObjectTarget, UploadMode, UploadOutcome};
pub use crate::domain::ports::ObjectStoreClient;
pub use crate::utils::error::Result;

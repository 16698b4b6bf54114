use crate::domain::model::{CompletedPart, ObjectTarget};
use crate::utils::error::Result;
use async_trait::async_trait;

/// The subset of the S3 API needed to stream an object.
///
/// Implementations report failures as [`UploadError::Storage`] and set
/// `retryable` for transient conditions.
///
/// [`UploadError::Storage`]: crate::utils::error::UploadError::Storage
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Starts a multipart upload and returns its upload id.
    async fn create_multipart_upload(&self, target: &ObjectTarget) -> Result<String>;

    async fn upload_part(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart>;

    /// Assembles `parts` (sorted by part number) into the final object and
    /// returns its ETag.
    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<Option<String>>;

    async fn abort_multipart_upload(&self, target: &ObjectTarget, upload_id: &str) -> Result<()>;

    /// Stores a whole object in one request and returns its ETag.
    async fn put_object(&self, target: &ObjectTarget, body: Vec<u8>) -> Result<Option<String>>;
}

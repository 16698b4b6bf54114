use crate::config::S3Settings;
use crate::domain::model::{CompletedPart, ObjectTarget};
use crate::domain::ports::ObjectStoreClient;
use crate::utils::error::{Result, UploadError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client as S3Client;

/// Service error codes worth another attempt.
const RETRYABLE_CODES: &[&str] = &[
    "SlowDown",
    "InternalError",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "ServiceUnavailable",
];

/// [`ObjectStoreClient`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsS3Client {
    client: S3Client,
}

impl AwsS3Client {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Builds a client from the default AWS credential chain, applying the
    /// region, endpoint and addressing overrides in `settings`.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if settings.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }

        tracing::debug!(
            "S3 client configured (region: {:?}, endpoint: {:?}, path style: {})",
            settings.region,
            settings.endpoint,
            settings.force_path_style
        );
        Self::new(S3Client::from_conf(s3_builder.build()))
    }
}

fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let retryable = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => service
            .err()
            .code()
            .is_some_and(|code| RETRYABLE_CODES.contains(&code)),
        _ => false,
    };
    let message = match err.code() {
        Some(code) => format!(
            "{}: {}",
            code,
            err.message().unwrap_or("no message from service")
        ),
        None => DisplayErrorContext(&err).to_string(),
    };
    UploadError::storage(operation, message, retryable)
}

#[async_trait]
impl ObjectStoreClient for AwsS3Client {
    async fn create_multipart_upload(&self, target: &ObjectTarget) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .set_content_type(target.content_type.clone())
            .send()
            .await
            .map_err(|e| sdk_error("create_multipart_upload", e))?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            UploadError::storage(
                "create_multipart_upload",
                "response did not contain an upload id",
                false,
            )
        })
    }

    async fn upload_part(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart> {
        let size = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("upload_part", e))?;

        Ok(CompletedPart {
            part_number,
            e_tag: output.e_tag().map(str::to_string),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<Option<String>> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .set_e_tag(part.e_tag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("complete_multipart_upload", e))?;

        Ok(output.e_tag().map(str::to_string))
    }

    async fn abort_multipart_upload(&self, target: &ObjectTarget, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort_multipart_upload", e))?;
        Ok(())
    }

    async fn put_object(&self, target: &ObjectTarget, body: Vec<u8>) -> Result<Option<String>> {
        let output = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .set_content_type(target.content_type.clone())
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("put_object", e))?;

        Ok(output.e_tag().map(str::to_string))
    }
}

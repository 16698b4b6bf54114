use crate::config::{UploadConfig, MAX_PARTS};
use crate::core::completion::{self, CompletionSlot, UploadCompletion};
use crate::core::retry::RetryPolicy;
use crate::domain::model::{CompletedPart, ObjectTarget, UploadMode, UploadOutcome};
use crate::domain::ports::ObjectStoreClient;
use crate::utils::error::{Result, UploadError};
use crate::utils::validation::{validate_non_empty_string, validate_positive_number};
use chrono::Utc;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

type PartHandle = JoinHandle<Result<CompletedPart>>;
type UploadIdSlot = Option<Result<String>>;

/// State shared by the stream and every task it spawns.
struct UploadContext {
    client: Arc<dyn ObjectStoreClient>,
    target: ObjectTarget,
    retry: RetryPolicy,
    upload_id: watch::Sender<UploadIdSlot>,
    permits: Semaphore,
}

impl UploadContext {
    /// Runs in its own task, started with the first part and never cancelled,
    /// so an upload created on the server always has its id recorded.
    async fn create_upload(&self) {
        let result = self
            .retry
            .run("create_multipart_upload", || {
                self.client.create_multipart_upload(&self.target)
            })
            .await;

        let result = match result {
            Ok(upload_id) => {
                tracing::info!(
                    "Created multipart upload {} for {}",
                    upload_id,
                    self.target.uri()
                );
                Ok(upload_id)
            }
            Err(e) => Err(UploadError::CreateUploadFailed {
                bucket: self.target.bucket.clone(),
                key: self.target.key.clone(),
                message: e.to_string(),
            }),
        };
        self.upload_id.send_replace(Some(result));
    }

    /// Waits for the create task. A failure is shared by every part.
    async fn upload_id(&self) -> Result<String> {
        let mut rx = self.upload_id.subscribe();
        let slot = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        slot.unwrap_or_else(|| {
            Err(UploadError::TaskFailed {
                message: "upload id channel closed".to_string(),
            })
        })
    }

    fn known_upload_id(&self) -> Option<String> {
        match &*self.upload_id.borrow() {
            Some(Ok(upload_id)) => Some(upload_id.clone()),
            _ => None,
        }
    }

    async fn upload_part(&self, part_number: i32, body: Vec<u8>) -> Result<CompletedPart> {
        let upload_id = self.upload_id().await?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| UploadError::TaskFailed {
                message: e.to_string(),
            })?;

        tracing::debug!(
            "Uploading part {} ({} bytes) of {}",
            part_number,
            body.len(),
            self.target.uri()
        );

        let part = self
            .retry
            .run("upload_part", || {
                self.client
                    .upload_part(&self.target, &upload_id, part_number, body.clone())
            })
            .await
            .map_err(|e| UploadError::PartUploadFailed {
                part_number,
                message: e.to_string(),
            })?;

        tracing::debug!("Part {} uploaded, etag {:?}", part_number, part.e_tag);
        Ok(part)
    }

    async fn put_single(&self, body: Vec<u8>) -> Result<UploadOutcome> {
        let total_bytes = body.len() as u64;
        tracing::info!(
            "Storing {} bytes to {} with a single request",
            total_bytes,
            self.target.uri()
        );

        let e_tag = self
            .retry
            .run("put_object", || self.client.put_object(&self.target, body.clone()))
            .await
            .map_err(|e| UploadError::PutObjectFailed {
                message: e.to_string(),
            })?;

        Ok(UploadOutcome {
            bucket: self.target.bucket.clone(),
            key: self.target.key.clone(),
            upload_id: None,
            e_tag,
            parts: Vec::new(),
            total_bytes,
            mode: UploadMode::SinglePut,
            completed_at: Utc::now(),
        })
    }

    /// Waits for every part in part order, then completes the upload. Any
    /// failure cancels the remaining parts and aborts the upload.
    async fn complete(
        &self,
        parts: Vec<PartHandle>,
        create_task: Option<JoinHandle<()>>,
        pending_error: Option<UploadError>,
    ) -> Result<UploadOutcome> {
        let mut completed = Vec::with_capacity(parts.len());
        let mut failure = pending_error;

        for handle in parts {
            if failure.is_some() {
                handle.abort();
                let _ = handle.await;
                continue;
            }
            match handle.await {
                Ok(Ok(part)) => completed.push(part),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => {
                    failure = Some(UploadError::TaskFailed {
                        message: e.to_string(),
                    })
                }
            }
        }

        if let Some(e) = failure {
            settle(create_task).await;
            self.abort().await;
            return Err(e);
        }

        let upload_id = self.upload_id().await?;
        completed.sort_by_key(|part| part.part_number);

        let result = self
            .retry
            .run("complete_multipart_upload", || {
                self.client
                    .complete_multipart_upload(&self.target, &upload_id, &completed)
            })
            .await;

        match result {
            Ok(e_tag) => Ok(UploadOutcome {
                bucket: self.target.bucket.clone(),
                key: self.target.key.clone(),
                upload_id: Some(upload_id),
                e_tag,
                total_bytes: completed.iter().map(|part| part.size as u64).sum(),
                parts: completed,
                mode: UploadMode::Multipart,
                completed_at: Utc::now(),
            }),
            Err(e) => {
                self.abort().await;
                Err(UploadError::CompleteUploadFailed {
                    upload_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Lets dispatched parts run to completion, then aborts the upload.
    async fn drain_and_abort(&self, parts: Vec<PartHandle>, create_task: Option<JoinHandle<()>>) {
        for handle in parts {
            let _ = handle.await;
        }
        settle(create_task).await;
        self.abort().await;
    }

    /// Best effort; failures are only logged.
    async fn abort(&self) {
        let Some(upload_id) = self.known_upload_id() else {
            return;
        };

        tracing::warn!(
            "Aborting multipart upload {} for {}",
            upload_id,
            self.target.uri()
        );
        if let Err(e) = self
            .retry
            .run("abort_multipart_upload", || {
                self.client.abort_multipart_upload(&self.target, &upload_id)
            })
            .await
        {
            tracing::error!("Failed to abort multipart upload {}: {}", upload_id, e);
        }
    }
}

async fn settle(create_task: Option<JoinHandle<()>>) {
    if let Some(task) = create_task {
        let _ = task.await;
    }
}

fn publish(tx: &watch::Sender<CompletionSlot>, target: &ObjectTarget, result: Result<UploadOutcome>) {
    match &result {
        Ok(outcome) => tracing::info!(
            "✅ Upload to {} finished: {} bytes in {} part(s)",
            target.uri(),
            outcome.total_bytes,
            outcome.parts.len().max(1)
        ),
        Err(e) => tracing::error!("❌ Upload to {} failed: {}", target.uri(), e),
    }
    tx.send_replace(Some(result));
}

/// A writer that streams everything written to it into one S3 object.
///
/// Bytes are buffered up to `buffer_size`; every full buffer becomes one part
/// of a multipart upload and is sent in the background on the tokio runtime,
/// so `write` never waits for the network. [`close`](Self::close) sends the
/// remainder and finalizes the upload; the outcome is delivered through
/// [`completion`](Self::completion). Objects that never fill a buffer are
/// stored with a single `put_object` instead.
///
/// Dropping an unclosed stream aborts the upload.
pub struct S3UploadStream {
    ctx: Arc<UploadContext>,
    runtime: Handle,
    buffer_size: usize,
    buffer: Vec<u8>,
    parts: Vec<PartHandle>,
    create_task: Option<JoinHandle<()>>,
    parts_dispatched: usize,
    bytes_written: u64,
    closed: bool,
    completion_tx: Option<watch::Sender<CompletionSlot>>,
    completion: UploadCompletion,
}

impl S3UploadStream {
    /// Creates a stream driven by the current tokio runtime.
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        target: ObjectTarget,
        config: UploadConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UploadError::RuntimeUnavailable)?;
        Self::with_handle(client, target, config, runtime)
    }

    pub fn with_handle(
        client: Arc<dyn ObjectStoreClient>,
        target: ObjectTarget,
        config: UploadConfig,
        runtime: Handle,
    ) -> Result<Self> {
        validate_non_empty_string("bucket", &target.bucket)?;
        validate_non_empty_string("key", &target.key)?;
        validate_positive_number("buffer_size", config.buffer_size, 1)?;
        validate_positive_number("max_concurrency", config.max_concurrency, 1)?;

        let (completion_tx, completion) = completion::channel();

        Ok(Self {
            ctx: Arc::new(UploadContext {
                client,
                target,
                retry: config.retry,
                upload_id: watch::channel(None).0,
                permits: Semaphore::new(config.max_concurrency),
            }),
            runtime,
            buffer_size: config.buffer_size,
            buffer: Vec::with_capacity(config.buffer_size),
            parts: Vec::new(),
            create_task: None,
            parts_dispatched: 0,
            bytes_written: 0,
            closed: false,
            completion_tx: Some(completion_tx),
            completion,
        })
    }

    pub fn target(&self) -> &ObjectTarget {
        &self.ctx.target
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn parts_dispatched(&self) -> usize {
        self.parts_dispatched
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle resolving once the stream is closed and the upload finished.
    pub fn completion(&self) -> UploadCompletion {
        self.completion.clone()
    }

    /// Closes the stream and waits for the upload to finish.
    pub async fn finish(mut self) -> Result<UploadOutcome> {
        let completion = self.completion();
        // a close failure is also published to the completion
        let _ = self.close_upload();
        drop(self);
        completion.wait().await
    }

    /// Discards buffered bytes and aborts the upload, waiting until the store
    /// has been told. Completion handles resolve to [`UploadError::Aborted`].
    /// Does nothing on a closed stream.
    pub async fn abort(mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let parts = std::mem::take(&mut self.parts);
        let create_task = self.create_task.take();
        let tx = self.completion_tx.take();
        let ctx = Arc::clone(&self.ctx);
        drop(self);

        tracing::warn!("Aborting upload to {}", ctx.target.uri());
        ctx.drain_and_abort(parts, create_task).await;
        if let Some(tx) = tx {
            tx.send_replace(Some(Err(UploadError::Aborted)));
        }
    }

    /// Sends the remaining bytes and finalizes the upload in the background.
    /// Calling it again is a no-op.
    pub fn close_upload(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let Some(tx) = self.completion_tx.take() else {
            return Ok(());
        };

        let single_put = self.parts_dispatched == 0;
        let pending_error = if single_put {
            None
        } else {
            self.dispatch_part().err()
        };

        let parts = std::mem::take(&mut self.parts);
        let create_task = self.create_task.take();
        // no writes once closed
        let remainder = std::mem::take(&mut self.buffer);
        let ctx = Arc::clone(&self.ctx);
        let error = pending_error.clone();

        self.runtime.spawn(async move {
            let result = if single_put {
                ctx.put_single(remainder).await
            } else {
                ctx.complete(parts, create_task, pending_error).await
            };
            publish(&tx, &ctx.target, result);
        });

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.close_upload().map_err(io::Error::from)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(UploadError::Closed);
        }
        Ok(())
    }

    fn dispatch_part(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.parts_dispatched >= MAX_PARTS {
            return Err(UploadError::TooManyParts { limit: MAX_PARTS });
        }

        if self.create_task.is_none() {
            let ctx = Arc::clone(&self.ctx);
            self.create_task = Some(self.runtime.spawn(async move { ctx.create_upload().await }));
        }

        self.parts_dispatched += 1;
        let part_number = self.parts_dispatched as i32;
        let body = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.buffer_size));
        let ctx = Arc::clone(&self.ctx);

        self.parts.push(
            self.runtime
                .spawn(async move { ctx.upload_part(part_number, body).await }),
        );
        Ok(())
    }
}

impl Write for S3UploadStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        // a full buffer left behind by a failed dispatch
        if self.buffer.len() == self.buffer_size {
            self.dispatch_part()?;
        }

        let mut written = 0;
        while written < buf.len() {
            let take = (self.buffer_size - self.buffer.len()).min(buf.len() - written);
            self.buffer.extend_from_slice(&buf[written..written + take]);
            written += take;

            if self.buffer.len() == self.buffer_size {
                if let Err(e) = self.dispatch_part() {
                    tracing::warn!("Could not dispatch part: {}", e);
                    // reported by the next call
                    break;
                }
            }
        }

        self.bytes_written += written as u64;
        Ok(written)
    }

    /// Sends the buffered bytes as a part. S3 requires every part but the last
    /// to be at least 5 MiB, so only flush at such boundaries.
    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.dispatch_part()?;
        Ok(())
    }
}

impl Drop for S3UploadStream {
    fn drop(&mut self) {
        if self.closed || self.parts.is_empty() {
            return;
        }

        tracing::warn!(
            "Upload stream for {} dropped without close, aborting upload",
            self.ctx.target.uri()
        );
        let parts = std::mem::take(&mut self.parts);
        let create_task = self.create_task.take();
        let ctx = Arc::clone(&self.ctx);
        self.runtime.spawn(async move { ctx.drain_and_abort(parts, create_task).await });
    }
}

impl fmt::Debug for S3UploadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3UploadStream")
            .field("target", &self.ctx.target)
            .field("buffer_size", &self.buffer_size)
            .field("buffered", &self.buffer.len())
            .field("parts_dispatched", &self.parts_dispatched)
            .field("bytes_written", &self.bytes_written)
            .field("closed", &self.closed)
            .finish()
    }
}

use crate::domain::model::{CompletedPart, ObjectTarget};
use crate::domain::ports::ObjectStoreClient;
use crate::utils::error::{Result, UploadError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    PutObject,
}

impl StoreOperation {
    fn name(self) -> &'static str {
        match self {
            StoreOperation::CreateMultipartUpload => "create_multipart_upload",
            StoreOperation::UploadPart => "upload_part",
            StoreOperation::CompleteMultipartUpload => "complete_multipart_upload",
            StoreOperation::AbortMultipartUpload => "abort_multipart_upload",
            StoreOperation::PutObject => "put_object",
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    remaining: u32,
    retryable: bool,
    part_number: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub e_tag: String,
    pub content_type: Option<String>,
}

#[derive(Debug)]
struct PendingUpload {
    target: ObjectTarget,
    parts: BTreeMap<i32, (Vec<u8>, String)>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    aborted: HashSet<String>,
    calls: HashMap<StoreOperation, usize>,
    faults: HashMap<StoreOperation, Fault>,
    next_upload: u64,
}

/// Object store kept in process memory, with multipart semantics close to
/// S3's and hooks for injecting failures. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<StoreState>,
    min_part_size: usize,
    part_delay: Option<Duration>,
    create_delay: Option<Duration>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects completion when a part other than the last is smaller than
    /// `min_part_size`, like S3's `EntityTooSmall`.
    pub fn with_min_part_size(mut self, min_part_size: usize) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Slows down every part upload, for exercising concurrency.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    /// Slows down multipart upload creation.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Fails the next `times` calls of `operation`.
    pub fn fail_next(&self, operation: StoreOperation, times: u32, retryable: bool) {
        self.set_fault(
            operation,
            Fault {
                remaining: times,
                retryable,
                part_number: None,
            },
        );
    }

    /// Fails the next `times` uploads of one specific part.
    pub fn fail_part(&self, part_number: i32, times: u32, retryable: bool) {
        self.set_fault(
            StoreOperation::UploadPart,
            Fault {
                remaining: times,
                retryable,
                part_number: Some(part_number),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .ok()?
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn calls(&self, operation: StoreOperation) -> usize {
        self.lock()
            .map(|state| state.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn pending_uploads(&self) -> usize {
        self.lock().map(|state| state.uploads.len()).unwrap_or(0)
    }

    pub fn was_aborted(&self, upload_id: &str) -> bool {
        self.lock()
            .map(|state| state.aborted.contains(upload_id))
            .unwrap_or(false)
    }

    pub fn aborted_uploads(&self) -> usize {
        self.lock().map(|state| state.aborted.len()).unwrap_or(0)
    }

    fn set_fault(&self, operation: StoreOperation, fault: Fault) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.insert(operation, fault);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| UploadError::storage("lock", "object store lock poisoned", false))
    }

    /// Records the call and returns an injected failure, if one is armed.
    fn enter(&self, operation: StoreOperation, part_number: Option<i32>) -> Result<()> {
        let mut state = self.lock()?;
        *state.calls.entry(operation).or_insert(0) += 1;

        let Some(fault) = state.faults.get_mut(&operation) else {
            return Ok(());
        };
        if fault.remaining == 0 || (fault.part_number.is_some() && fault.part_number != part_number) {
            return Ok(());
        }

        fault.remaining -= 1;
        let retryable = fault.retryable;
        Err(UploadError::storage(
            operation.name(),
            "injected failure",
            retryable,
        ))
    }
}

fn e_tag_for(data: &[u8]) -> String {
    // FNV-1a; stable and good enough to tell parts apart
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("\"{:016x}\"", hash)
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn create_multipart_upload(&self, target: &ObjectTarget) -> Result<String> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.enter(StoreOperation::CreateMultipartUpload, None)?;

        let mut state = self.lock()?;
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                target: target.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _target: &ObjectTarget,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart> {
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
        self.enter(StoreOperation::UploadPart, Some(part_number))?;

        if !(1..=10_000).contains(&part_number) {
            return Err(UploadError::storage(
                "upload_part",
                format!("InvalidArgument: part number {} out of range", part_number),
                false,
            ));
        }

        let mut state = self.lock()?;
        let upload = state.uploads.get_mut(upload_id).ok_or_else(|| {
            UploadError::storage("upload_part", format!("NoSuchUpload: {}", upload_id), false)
        })?;

        let e_tag = e_tag_for(&body);
        let size = body.len();
        upload.parts.insert(part_number, (body, e_tag.clone()));

        Ok(CompletedPart {
            part_number,
            e_tag: Some(e_tag),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<Option<String>> {
        self.enter(StoreOperation::CompleteMultipartUpload, None)?;

        let mut state = self.lock()?;
        let upload = state.uploads.get(upload_id).ok_or_else(|| {
            UploadError::storage(
                "complete_multipart_upload",
                format!("NoSuchUpload: {}", upload_id),
                false,
            )
        })?;

        if parts.is_empty() {
            return Err(UploadError::storage(
                "complete_multipart_upload",
                "MalformedXML: no parts listed",
                false,
            ));
        }
        if parts.windows(2).any(|pair| pair[0].part_number >= pair[1].part_number) {
            return Err(UploadError::storage(
                "complete_multipart_upload",
                "InvalidPartOrder: parts must be listed in ascending order",
                false,
            ));
        }

        let mut data = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let (bytes, e_tag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                UploadError::storage(
                    "complete_multipart_upload",
                    format!("InvalidPart: part {} was never uploaded", part.part_number),
                    false,
                )
            })?;
            if part.e_tag.as_deref() != Some(e_tag.as_str()) {
                return Err(UploadError::storage(
                    "complete_multipart_upload",
                    format!("InvalidPart: etag mismatch for part {}", part.part_number),
                    false,
                ));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && bytes.len() < self.min_part_size {
                return Err(UploadError::storage(
                    "complete_multipart_upload",
                    format!(
                        "EntityTooSmall: part {} is {} bytes",
                        part.part_number,
                        bytes.len()
                    ),
                    false,
                ));
            }
            data.extend_from_slice(bytes);
        }

        let e_tag = format!("\"{}-{}\"", e_tag_for(&data).trim_matches('"'), parts.len());
        let content_type = upload.target.content_type.clone();
        state.uploads.remove(upload_id);
        state.objects.insert(
            (target.bucket.clone(), target.key.clone()),
            StoredObject {
                data,
                e_tag: e_tag.clone(),
                content_type,
            },
        );
        Ok(Some(e_tag))
    }

    async fn abort_multipart_upload(&self, _target: &ObjectTarget, upload_id: &str) -> Result<()> {
        self.enter(StoreOperation::AbortMultipartUpload, None)?;

        let mut state = self.lock()?;
        state.uploads.remove(upload_id);
        state.aborted.insert(upload_id.to_string());
        Ok(())
    }

    async fn put_object(&self, target: &ObjectTarget, body: Vec<u8>) -> Result<Option<String>> {
        self.enter(StoreOperation::PutObject, None)?;

        let e_tag = e_tag_for(&body);
        let mut state = self.lock()?;
        state.objects.insert(
            (target.bucket.clone(), target.key.clone()),
            StoredObject {
                data: body,
                e_tag: e_tag.clone(),
                content_type: target.content_type.clone(),
            },
        );
        Ok(Some(e_tag))
    }
}

use s3_upload::{
    InMemoryObjectStore, ObjectTarget, RetryPolicy, S3UploadStream, StoreOperation, UploadConfig,
    UploadError, UploadMode,
};
use std::io::{Cursor, ErrorKind, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const BUCKET: &str = "data-exports";
const KEY: &str = "reports/output.bin";

fn target() -> ObjectTarget {
    ObjectTarget::new(BUCKET, KEY)
}

fn config(buffer_size: usize) -> UploadConfig {
    UploadConfig::default()
        .with_buffer_size(buffer_size)
        .with_retry(RetryPolicy::new(3, 1))
}

fn open(store: &Arc<InMemoryObjectStore>, buffer_size: usize) -> S3UploadStream {
    S3UploadStream::new(store.clone(), target(), config(buffer_size)).unwrap()
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_small_object_uses_single_put() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 16);

    stream.write_all(b"hello").unwrap();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.mode, UploadMode::SinglePut);
    assert_eq!(outcome.total_bytes, 5);
    assert!(outcome.upload_id.is_none());
    assert!(outcome.parts.is_empty());
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"hello");
    assert_eq!(store.calls(StoreOperation::PutObject), 1);
    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 0);
}

#[tokio::test]
async fn test_empty_stream_stores_empty_object() {
    let store = Arc::new(InMemoryObjectStore::new());
    let stream = open(&store, 16);

    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.total_bytes, 0);
    assert!(store.object(BUCKET, KEY).unwrap().data.is_empty());
}

#[tokio::test]
async fn test_multipart_upload_assembles_parts_in_order() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);

    stream.write_all(b"abc").unwrap();
    stream.write_all(b"defgh").unwrap();
    stream.write_all(b"ij").unwrap();
    assert_eq!(stream.bytes_written(), 10);
    assert_eq!(stream.parts_dispatched(), 2);

    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.mode, UploadMode::Multipart);
    assert_eq!(outcome.total_bytes, 10);
    assert!(outcome.upload_id.is_some());
    let numbers: Vec<i32> = outcome.parts.iter().map(|p| p.part_number).collect();
    let sizes: Vec<usize> = outcome.parts.iter().map(|p| p.size).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(sizes, vec![4, 4, 2]);

    let object = store.object(BUCKET, KEY).unwrap();
    assert_eq!(object.data, b"abcdefghij");
    assert_eq!(Some(object.e_tag), outcome.e_tag);
    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 1);
    assert_eq!(store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_exact_multiple_of_buffer_adds_no_empty_part() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);

    stream.write_all(b"12345678").unwrap();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.parts.len(), 2);
    assert_eq!(store.calls(StoreOperation::UploadPart), 2);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"12345678");
}

#[tokio::test]
async fn test_closed_stream_rejects_writes() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);
    stream.write_all(b"data").unwrap();

    assert_ok!(stream.close());
    assert_ok!(stream.close());
    assert!(stream.is_closed());

    let err = stream.write(b"more").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    assert_eq!(err.to_string(), "Stream is closed");
    assert_err!(stream.flush());

    let outcome = stream.completion().wait().await.unwrap();
    assert_eq!(outcome.total_bytes, 4);
    assert_eq!(store.calls(StoreOperation::CompleteMultipartUpload), 1);
}

#[tokio::test]
async fn test_completion_taken_before_close() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);
    let completion = stream.completion();
    let waiter = tokio::spawn(completion.clone().wait());

    assert!(!completion.is_finished());
    stream.write_all(b"0123456789").unwrap();
    stream.close().unwrap();

    let outcome = waiter.await.unwrap().unwrap();
    assert_eq!(outcome.total_bytes, 10);
    assert!(completion.is_finished());
    assert_eq!(completion.try_result().unwrap().unwrap(), outcome);
}

#[tokio::test]
async fn test_flush_dispatches_buffered_bytes() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 8);

    stream.write_all(b"abc").unwrap();
    stream.flush().unwrap();
    // nothing buffered, nothing sent
    stream.flush().unwrap();
    assert_eq!(stream.parts_dispatched(), 1);
    stream.write_all(b"de").unwrap();

    let outcome = stream.finish().await.unwrap();

    let sizes: Vec<usize> = outcome.parts.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![3, 2]);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"abcde");
}

#[tokio::test]
async fn test_io_copy_into_stream() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 1000);
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let copied = std::io::copy(&mut Cursor::new(payload.clone()), &mut stream).unwrap();
    assert_eq!(copied, 10_000);

    let outcome = stream.finish().await.unwrap();
    assert_eq!(outcome.parts.len(), 10);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, payload);
}

#[tokio::test]
async fn test_transient_part_failure_is_retried() {
    let store = Arc::new(InMemoryObjectStore::new());
    store.fail_part(2, 2, true);
    let mut stream = open(&store, 4);

    stream.write_all(b"aaaabbbbcc").unwrap();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.parts.len(), 3);
    assert_eq!(store.calls(StoreOperation::UploadPart), 5);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"aaaabbbbcc");
}

#[tokio::test]
async fn test_permanent_part_failure_aborts_upload() {
    let store = Arc::new(InMemoryObjectStore::new());
    store.fail_part(1, 1, false);
    let mut stream = open(&store, 4);

    stream.write_all(b"aaaabbbbcc").unwrap();
    let err = stream.finish().await.unwrap_err();

    assert!(matches!(err, UploadError::PartUploadFailed { part_number: 1, .. }));
    assert_eq!(store.calls(StoreOperation::AbortMultipartUpload), 1);
    assert!(store.was_aborted("upload-1"));
    assert!(store.object(BUCKET, KEY).is_none());
    assert_eq!(store.calls(StoreOperation::CompleteMultipartUpload), 0);
}

#[tokio::test]
async fn test_create_failure_is_shared_by_all_parts() {
    let store = Arc::new(InMemoryObjectStore::new());
    store.fail_next(StoreOperation::CreateMultipartUpload, 1, false);
    let mut stream = open(&store, 2);

    stream.write_all(b"aabbccdd").unwrap();
    let err = stream.finish().await.unwrap_err();

    assert!(matches!(err, UploadError::CreateUploadFailed { .. }));
    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 1);
    assert_eq!(store.calls(StoreOperation::UploadPart), 0);
    // no upload id, nothing to abort
    assert_eq!(store.calls(StoreOperation::AbortMultipartUpload), 0);
}

#[tokio::test]
async fn test_rejected_completion_aborts_upload() {
    let store = Arc::new(InMemoryObjectStore::new().with_min_part_size(8));
    let mut stream = open(&store, 4);

    stream.write_all(b"aaaabbbb").unwrap();
    let err = stream.finish().await.unwrap_err();

    match err {
        UploadError::CompleteUploadFailed { upload_id, message } => {
            assert_eq!(upload_id, "upload-1");
            assert!(message.contains("EntityTooSmall"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.aborted_uploads(), 1);
    assert_eq!(store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_put_object_failure_is_reported() {
    let store = Arc::new(InMemoryObjectStore::new());
    store.fail_next(StoreOperation::PutObject, 5, true);
    let mut stream = open(&store, 16);

    stream.write_all(b"small").unwrap();
    let err = stream.finish().await.unwrap_err();

    assert!(matches!(err, UploadError::PutObjectFailed { .. }));
    // first attempt plus three retries
    assert_eq!(store.calls(StoreOperation::PutObject), 4);
}

#[tokio::test]
async fn test_dropping_unclosed_stream_aborts_upload() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);
    let completion = stream.completion();

    stream.write_all(b"aaaabbbbcc").unwrap();
    drop(stream);

    assert_eq!(completion.wait().await.unwrap_err(), UploadError::Abandoned);
    assert!(eventually(|| store.aborted_uploads() == 1).await);
    assert!(store.object(BUCKET, KEY).is_none());
}

#[tokio::test]
async fn test_part_limit_accepts_last_byte_then_fails() {
    // parts are cancelled while the upload is still being created
    let store = Arc::new(InMemoryObjectStore::new().with_create_delay(Duration::from_millis(20)));
    let mut stream = open(&store, 1);

    let written = assert_ok!(stream.write(&[7u8; 10_001]));
    assert_eq!(written, 10_001);
    assert_eq!(stream.parts_dispatched(), 10_000);
    assert_eq!(stream.bytes_written(), 10_001);

    let err = assert_err!(stream.write(b"x"));
    assert_eq!(UploadError::from(err), UploadError::TooManyParts { limit: 10_000 });

    let err = stream.finish().await.unwrap_err();
    assert_eq!(err, UploadError::TooManyParts { limit: 10_000 });
    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 1);
    assert_eq!(store.aborted_uploads(), 1);
    assert_eq!(store.pending_uploads(), 0);
    assert!(store.object(BUCKET, KEY).is_none());
}

#[tokio::test]
async fn test_abort_discards_upload() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = open(&store, 4);
    let completion = stream.completion();

    stream.write_all(b"aaaabbbbcc").unwrap();
    stream.abort().await;

    assert_eq!(store.aborted_uploads(), 1);
    assert_eq!(store.pending_uploads(), 0);
    assert_eq!(completion.wait().await.unwrap_err(), UploadError::Aborted);
    assert!(store.object(BUCKET, KEY).is_none());
    assert_eq!(store.calls(StoreOperation::CompleteMultipartUpload), 0);
}

#[tokio::test]
async fn test_abort_waits_for_slow_create() {
    let store = Arc::new(InMemoryObjectStore::new().with_create_delay(Duration::from_millis(20)));
    let mut stream = open(&store, 4);

    stream.write_all(b"aaaabbbb").unwrap();
    stream.abort().await;

    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 1);
    assert_eq!(store.aborted_uploads(), 1);
    assert_eq!(store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_dropping_unwritten_stream_touches_nothing() {
    let store = Arc::new(InMemoryObjectStore::new());
    let stream = open(&store, 4);
    let completion = stream.completion();
    drop(stream);

    assert_eq!(completion.wait().await.unwrap_err(), UploadError::Abandoned);
    assert_eq!(store.calls(StoreOperation::CreateMultipartUpload), 0);
    assert_eq!(store.calls(StoreOperation::PutObject), 0);
}

#[tokio::test]
async fn test_bounded_concurrency_completes_all_parts() {
    let store = Arc::new(InMemoryObjectStore::new().with_part_delay(Duration::from_millis(5)));
    let mut stream = S3UploadStream::new(
        store.clone(),
        target(),
        config(2).with_max_concurrency(2),
    )
    .unwrap();

    stream.write_all(b"aabbccddeeffgg").unwrap();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.parts.len(), 7);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"aabbccddeeffgg");
}

#[tokio::test]
async fn test_content_type_is_kept() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream = S3UploadStream::new(
        store.clone(),
        target().with_content_type("text/csv"),
        config(4),
    )
    .unwrap();

    stream.write_all(b"id,name\n1,a\n").unwrap();
    stream.finish().await.unwrap();

    let object = store.object(BUCKET, KEY).unwrap();
    assert_eq!(object.content_type.as_deref(), Some("text/csv"));
}

#[tokio::test]
async fn test_invalid_arguments_are_rejected() {
    let store = Arc::new(InMemoryObjectStore::new());

    let empty_key = S3UploadStream::new(store.clone(), ObjectTarget::new(BUCKET, ""), config(4));
    assert!(matches!(empty_key, Err(UploadError::InvalidConfigValueError { .. })));

    let zero_buffer = S3UploadStream::new(store.clone(), target(), config(0));
    assert!(matches!(zero_buffer, Err(UploadError::InvalidConfigValueError { .. })));
}

#[test]
fn test_new_requires_runtime() {
    let store = Arc::new(InMemoryObjectStore::new());
    let result = S3UploadStream::new(store, target(), config(4));
    assert!(matches!(result, Err(UploadError::RuntimeUnavailable)));
}

#[test]
fn test_writes_from_plain_thread_with_handle() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryObjectStore::new());
    let mut stream =
        S3UploadStream::with_handle(store.clone(), target(), config(3), runtime.handle().clone())
            .unwrap();

    let writer = std::thread::spawn(move || {
        stream.write_all(b"streamed from a thread").unwrap();
        stream
    });
    let stream = writer.join().unwrap();

    let outcome = runtime.block_on(stream.finish()).unwrap();
    assert_eq!(outcome.total_bytes, 22);
    assert_eq!(store.object(BUCKET, KEY).unwrap().data, b"streamed from a thread");
}

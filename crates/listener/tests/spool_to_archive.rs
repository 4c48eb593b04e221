//! Drives the worker over a real spool into filesystem archive stores.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use archive::{FsBlobStore, FsDocumentStore};
use listener::{EnvelopeDispatcher, SpoolOptions, SpoolQueueSource, Worker, WorkerOptions};
use pipeline::{
    ArchiveTargets, BlobTarget, CallbackInvoker, CallbackOptions, CancellationPolicy,
    DocumentTarget, HandlerOptions, MessageHandler, MockCallbackTransport, MockTokenProvider,
    Settings, SinkName,
};
use tokio_util::sync::CancellationToken;

fn files_under(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path.to_string_lossy().into_owned());
        }
    }
    found.sort();
    found
}

fn handler() -> Arc<MessageHandler> {
    let invoker = CallbackInvoker::new(
        Arc::new(MockTokenProvider::new()),
        Arc::new(MockCallbackTransport::new()),
        CallbackOptions::default(),
    );
    Arc::new(MessageHandler::new(
        Arc::new(invoker),
        HandlerOptions {
            callback_enabled: false,
            cancellation_policy: CancellationPolicy::Abort,
            archive: ArchiveTargets {
                blob: Some(BlobTarget::default()),
                document: Some(DocumentTarget::default()),
            },
        },
    ))
}

#[tokio::test]
async fn messages_are_archived_and_poison_is_dead_lettered() {
    let spool_dir = tempfile::tempdir().unwrap();
    let archive_dir = tempfile::tempdir().unwrap();

    let spool = SpoolQueueSource::open(
        spool_dir.path(),
        SpoolOptions {
            max_delivery_count: 1,
            poll_interval: Duration::from_millis(10),
        },
    )
    .await
    .unwrap();
    spool
        .enqueue("m-1", br#"{"id":"abc123","body":"hello"}"#)
        .await
        .unwrap();
    spool.enqueue("m-2", b"[1, 2, 3]").await.unwrap();

    let blobs = FsBlobStore::new(archive_dir.path().join("blobs"));
    let documents = FsDocumentStore::new(archive_dir.path().join("documents"));
    let dispatcher = EnvelopeDispatcher::new()
        .with_blob_sink(SinkName::archive_blob(), Arc::new(blobs))
        .with_document_sink(SinkName::archive_document(), Arc::new(documents));

    let worker = Worker::new(
        Arc::new(spool.clone()),
        handler(),
        Arc::new(dispatcher),
        Arc::new(Settings::new("https://callback.example/ping", "api://courier/.default").unwrap()),
        WorkerOptions {
            max_concurrent_invocations: 2,
            invocation_timeout: Duration::from_secs(5),
        },
    );

    let shutdown = CancellationToken::new();
    let running = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let settled = files_under(&spool_dir.path().join("inbox")).is_empty()
            && files_under(&spool_dir.path().join("processing")).is_empty()
            && !spool.dead_lettered().await.unwrap().is_empty();
        if settled {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "spool never drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    running.await.unwrap();

    let blobs = files_under(&archive_dir.path().join("blobs/archive"));
    assert_eq!(blobs.len(), 1);
    assert!(blobs[0].contains("abc123-") && blobs[0].ends_with("-output.json"));
    let archived: serde_json::Value = serde_json::from_slice(&std::fs::read(&blobs[0]).unwrap()).unwrap();
    assert_eq!(archived, serde_json::json!({"id": "abc123", "body": "hello"}));

    let document = archive_dir.path().join("documents/abc123/abc123.json");
    assert!(document.exists());

    assert_eq!(spool.dead_lettered().await.unwrap(), vec!["m-2".to_string()]);
}

use std::sync::{Arc, Mutex};

use bson::{Bson, Decimal128, doc, oid::ObjectId};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::codec::{Form, ValueCodec, layout::BINARY_MAGIC};
use crate::datasource::MemoryDataSource;
use crate::error::{ExecutionError, PorterError};
use crate::executor::context::OperationContext;
use crate::executor::progress::ProgressEvent;
use crate::executor::result::{CollectionStatus, RunStatus};

fn users(n: i32) -> Vec<bson::Document> {
    (0..n)
        .map(|i| doc! { "_id": i, "name": format!("user{i}"), "tags": ["a", "b"] })
        .collect()
}

fn sample_source() -> Arc<MemoryDataSource> {
    Arc::new(
        MemoryDataSource::new("shop")
            .with_collection("users", users(5))
            .with_collection("empty", Vec::new())
            .with_collection("system.views", users(1)),
    )
}

fn exporter(source: Arc<MemoryDataSource>, form: Form, compress: bool) -> Exporter {
    Exporter::new(
        source,
        ExportOptions {
            form,
            compress,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_export_all_collections_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("dump");

    let outcome = exporter(sample_source(), Form::Text, false)
        .export(&[], &out, &OperationContext::new(2))
        .await;
    assert_eq!(outcome.status(), RunStatus::Completed);

    let manifest = outcome.report;
    let names: Vec<&str> = manifest.collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["empty", "users"]);
    assert_eq!(manifest.collection("users").unwrap().status, CollectionStatus::Complete);
    assert_eq!(manifest.collection("empty").unwrap().status, CollectionStatus::Empty);
    assert_eq!(manifest.documents_written(), 5);

    let content = tokio::fs::read_to_string(out.join("users.json")).await.unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("{\"_id\":0,\"name\":\"user0\""));
    assert_eq!(tokio::fs::read(out.join("empty.json")).await.unwrap(), b"");
}

#[tokio::test]
async fn test_explicit_collections_keep_requested_order() {
    let dir = tempfile::tempdir().unwrap();
    let requested = vec!["users".to_string(), "missing".to_string()];

    let outcome = exporter(sample_source(), Form::Text, false)
        .export(&requested, dir.path(), &OperationContext::default())
        .await;
    let manifest = tokio_test::assert_ok!(outcome.into_result());

    assert_eq!(manifest.collections[0].name, "users");
    assert_eq!(manifest.collections[1].status, CollectionStatus::Empty);
}

#[tokio::test]
async fn test_unencodable_document_is_recorded_not_fatal() {
    let source = Arc::new(MemoryDataSource::new("ledger").with_collection(
        "entries",
        vec![
            doc! { "_id": 1, "amount": 10 },
            doc! { "_id": 2, "amount": Bson::Decimal128(Decimal128::from_bytes([0u8; 16])) },
            doc! { "_id": 3, "amount": 30 },
        ],
    ));
    let dir = tempfile::tempdir().unwrap();

    let outcome = exporter(source, Form::Text, false)
        .export(&[], dir.path(), &OperationContext::default())
        .await;
    assert_eq!(outcome.status(), RunStatus::CompletedWithFailures(1));

    let entries = outcome.report.collection("entries").unwrap().clone();
    assert_eq!(entries.documents_written, 2);
    assert_eq!(entries.failures.len(), 1);
    assert_eq!(entries.failures[0].index, 1);
    assert_eq!(entries.failures[0].id.as_deref(), Some("2"));
    assert!(entries.failures[0].reason.contains("decimal128"));
}

#[tokio::test]
async fn test_progress_reported_per_batch() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let events = events.clone();
        move |e: &ProgressEvent| events.lock().unwrap().push(e.clone())
    };
    let ctx = OperationContext::new(2).with_progress(Arc::new(sink));
    let dir = tempfile::tempdir().unwrap();

    exporter(sample_source(), Form::Text, false)
        .export(&["users".to_string()], dir.path(), &ctx)
        .await
        .into_result()
        .unwrap();

    let events = events.lock().unwrap();
    let processed: Vec<u64> = events.iter().map(|e| e.processed_in_collection).collect();
    assert_eq!(processed, vec![2, 4, 5]);
    assert!(events.iter().all(|e| e.total_in_collection == Some(5)));
    assert!(events.iter().all(|e| e.collections_total == 1));
}

#[tokio::test]
async fn test_cancel_between_batches_leaves_partial_file() {
    let token = CancellationToken::new();
    let sink = {
        let token = token.clone();
        move |e: &ProgressEvent| {
            if e.processed_in_collection >= 4 {
                token.cancel();
            }
        }
    };
    let ctx = OperationContext::new(2)
        .with_progress(Arc::new(sink))
        .with_cancellation(token);
    let source = Arc::new(MemoryDataSource::new("big").with_collection("a", users(10)).with_collection("b", users(3)));
    let dir = tempfile::tempdir().unwrap();

    let outcome = exporter(source, Form::Text, false)
        .export(&[], dir.path(), &ctx)
        .await;
    assert_eq!(outcome.status(), RunStatus::Cancelled);

    let manifest = outcome.report;
    assert!(manifest.cancelled);
    assert_eq!(manifest.collections.len(), 1);
    assert_eq!(manifest.collections[0].status, CollectionStatus::Partial);
    assert_eq!(manifest.collections[0].documents_written, 4);

    let content = tokio::fs::read_to_string(dir.path().join("a.json")).await.unwrap();
    assert_eq!(content.lines().count(), 4);
    assert!(!dir.path().join("b.json").exists());
}

#[tokio::test]
async fn test_compressed_export_leaves_only_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("backup.zip");

    let outcome = exporter(sample_source(), Form::Binary, true)
        .export(&[], &archive, &OperationContext::default())
        .await;
    assert_eq!(outcome.status(), RunStatus::Completed);
    assert!(outcome.report.compressed);

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("backup.zip")]);

    let unpacked = tempfile::tempdir().unwrap();
    crate::archive::unpack_file(&archive, unpacked.path()).unwrap();
    let users = std::fs::read(unpacked.path().join("users.bin")).unwrap();
    assert!(users.starts_with(BINARY_MAGIC));
}

#[tokio::test]
async fn test_binary_records_decode_back() {
    let oid = ObjectId::new();
    let source = Arc::new(
        MemoryDataSource::new("app").with_collection("things", vec![doc! { "_id": oid, "n": 7 }]),
    );
    let dir = tempfile::tempdir().unwrap();

    exporter(source, Form::Binary, false)
        .export(&[], dir.path(), &OperationContext::default())
        .await
        .into_result()
        .unwrap();

    let bytes = std::fs::read(dir.path().join("things.bin")).unwrap();
    let body = &bytes[BINARY_MAGIC.len()..];
    let len = u32::from_le_bytes(body[..4].try_into().unwrap()) as usize;
    assert_eq!(body.len(), 4 + len);

    let doc = ValueCodec::default()
        .decode_document(&body[4..], Form::Binary)
        .unwrap();
    assert_eq!(bson::Document::from(doc), doc! { "_id": oid, "n": 7 });
}

#[tokio::test]
async fn test_empty_database_is_nothing_to_export() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = exporter(Arc::new(MemoryDataSource::new("void")), Form::Text, false)
        .export(&[], dir.path(), &OperationContext::default())
        .await;

    assert_eq!(outcome.status(), RunStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(PorterError::Execution(ExecutionError::NothingToExport(_)))
    ));
}

#[tokio::test]
async fn test_unreachable_source_fails_run() {
    let source = sample_source();
    source.set_offline(true);
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("out.zip");

    let outcome = exporter(source, Form::Text, true)
        .export(&["users".to_string()], &archive, &OperationContext::default())
        .await;

    assert_eq!(outcome.status(), RunStatus::Failed);
    assert!(outcome.report.collections.is_empty());
    assert!(!archive.exists());
}

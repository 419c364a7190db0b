use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wms_bridge_core::clock::ManualClock;
use wms_bridge_core::config::RunOptions;
use wms_bridge_core::contract::{CompletedItem, MockCompletedItemSource, MockDocumentSink};
use wms_bridge_core::entity::{Scope, UploadFlow};
use wms_bridge_core::error::{RecordError, SyncError};
use wms_bridge_core::record::Record;
use wms_bridge_core::report::RunOutcome;
use wms_bridge_core::status::{UploadStatus, UploadStatusRecord};
use wms_bridge_core::store::{MemoryStore, UploadStatusStore};
use wms_bridge_core::uploader::UploadJob;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 16, 0, 0).unwrap()
}

fn shipment(id: &str, quantity: f64) -> CompletedItem {
    let record = Record::from_json(&json!({
        "shipment_id": id,
        "order_reference": 5001,
        "completed_at": "2024-04-10T14:30:00Z",
        "tracking_code": "3SABC123",
        "products": [
            { "order_line": 1, "sku": "SKU-1", "quantity": quantity }
        ],
    }));
    CompletedItem {
        item_id: id.to_string(),
        completed_at: record.as_date("completed_at"),
        record,
    }
}

fn completed_at(id: &str, at: DateTime<Utc>) -> CompletedItem {
    CompletedItem {
        completed_at: Some(at),
        ..shipment(id, 1.0)
    }
}

fn polling(items: Vec<CompletedItem>) -> MockCompletedItemSource {
    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .returning(move |_, _, _| Ok(items.clone()));
    source.expect_mark_processed().returning(|_, _, _| Ok(()));
    source
}

fn job(
    store: &Arc<MemoryStore>,
    source: MockCompletedItemSource,
    sink: MockDocumentSink,
) -> UploadJob {
    UploadJob::new(
        Scope::new("2001"),
        UploadFlow::Shipments,
        Arc::new(source),
        Arc::new(sink),
        store.clone(),
    )
    .with_clock(Arc::new(ManualClock::new(now())))
}

#[tokio::test]
async fn completed_shipment_is_submitted_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let mut sink = MockDocumentSink::new();
    sink.expect_submit()
        .withf(|_, flow, doc| {
            *flow == UploadFlow::Shipments
                && doc["SalesOrderNumber"] == 5001
                && doc["GoodsDeliveryLines"][0]["QuantityDelivered"] == 2.0
        })
        .times(1)
        .returning(|_, _, _| Ok("GD-77".to_string()));
    let job = job(&store, polling(vec![shipment("S-1", 2.0)]), sink);

    let first = job.run(&RunOptions::default()).await.expect("first run");
    let second = job.run(&RunOptions::default()).await.expect("second run");

    assert_eq!(first.written, 1);
    assert_eq!(second.written, 0);
    assert_eq!(second.unchanged, 1);
    let row = store
        .get_upload(&Scope::new("2001"), UploadFlow::Shipments, "S-1")
        .await
        .expect("store")
        .expect("row");
    assert_eq!(row.status, UploadStatus::Success);
    assert_eq!(row.remote_document_id.as_deref(), Some("GD-77"));
}

#[tokio::test]
async fn failed_submission_is_recorded_and_retried() {
    let store = Arc::new(MemoryStore::new());
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut sink = MockDocumentSink::new();
    sink.expect_submit().returning(move |_, _, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("500 Internal Server Error".into())
        } else {
            Ok("GD-78".to_string())
        }
    });
    let job = job(&store, polling(vec![shipment("S-2", 1.0)]), sink);

    let first = job.run(&RunOptions::default()).await.expect("first run");
    assert_eq!(first.outcome, RunOutcome::TotalFailure);
    assert!(matches!(first.failures[0].error, RecordError::Write(_)));
    let failed = store
        .get_upload(&Scope::new("2001"), UploadFlow::Shipments, "S-2")
        .await
        .expect("store")
        .expect("row");
    assert_eq!(failed.status, UploadStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("500")));

    let second = job.run(&RunOptions::default()).await.expect("second run");
    assert_eq!(second.written, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dry_run_submits_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .returning(|_, _, _| Ok(vec![shipment("S-3", 4.0)]));
    source.expect_mark_processed().times(0);
    let mut sink = MockDocumentSink::new();
    sink.expect_submit().times(0);
    let job = job(&store, source, sink);

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let report = job.run(&options).await.expect("dry run");

    assert_eq!(report.dry_run, 1);
    let last = store
        .last_successful_completion(&Scope::new("2001"), UploadFlow::Shipments)
        .await
        .expect("store");
    assert_eq!(last, None);
}

#[tokio::test]
async fn invalid_document_is_recorded_as_failed() {
    let store = Arc::new(MemoryStore::new());
    let mut sink = MockDocumentSink::new();
    sink.expect_submit().times(0);
    let job = job(&store, polling(vec![shipment("S-4", 0.0)]), sink);

    let report = job.run(&RunOptions::default()).await.expect("run");

    assert_eq!(report.errors, 1);
    assert!(matches!(report.failures[0].error, RecordError::Validation(_)));
    let row = store
        .get_upload(&Scope::new("2001"), UploadFlow::Shipments, "S-4")
        .await
        .expect("store")
        .expect("row");
    assert_eq!(row.status, UploadStatus::Failed);
    assert!(row
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("must be greater than zero")));
}

#[tokio::test]
async fn poll_resumes_from_the_last_successful_completion() {
    let store = Arc::new(MemoryStore::new());
    let last = now() - Duration::hours(3);
    store
        .record_upload(&UploadStatusRecord {
            scope: Scope::new("2001"),
            flow: UploadFlow::Shipments,
            item_id: "S-0".to_string(),
            completed_at: Some(last),
            upload_time: now() - Duration::hours(1),
            status: UploadStatus::Success,
            error_message: None,
            remote_document_id: Some("GD-1".to_string()),
        })
        .await
        .expect("seed");

    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .withf(move |_, _, since| *since == last)
        .times(1)
        .returning(|_, _, _| Ok(vec![]));
    let report = job(&store, source, MockDocumentSink::new())
        .run(&RunOptions::default())
        .await
        .expect("run");

    assert_eq!(report.fetched, 0);
}

#[tokio::test]
async fn poll_without_history_uses_the_lookback() {
    let store = Arc::new(MemoryStore::new());
    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .withf(|_, _, since| *since == now() - Duration::days(2))
        .times(1)
        .returning(|_, _, _| Ok(vec![]));

    job(&store, source, MockDocumentSink::new())
        .with_lookback(Duration::days(2))
        .run(&RunOptions::default())
        .await
        .expect("run");
}

#[tokio::test]
async fn poll_failure_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .returning(|_, _, _| Err("timeout".into()));

    let err = job(&store, source, MockDocumentSink::new())
        .run(&RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Upload(_)));
}

#[tokio::test]
async fn mark_processed_failure_keeps_the_upload_successful() {
    let store = Arc::new(MemoryStore::new());
    let mut source = MockCompletedItemSource::new();
    source
        .expect_poll_completed()
        .returning(|_, _, _| Ok(vec![shipment("S-5", 1.0)]));
    source
        .expect_mark_processed()
        .returning(|_, _, _| Err("409 Conflict".into()));
    let mut sink = MockDocumentSink::new();
    sink.expect_submit()
        .times(1)
        .returning(|_, _, _| Ok("GD-90".to_string()));
    let job = job(&store, source, sink);

    let report = job.run(&RunOptions::default()).await.expect("run");
    assert_eq!(report.outcome, RunOutcome::AllSucceeded);

    // the item shows up again, but is not resubmitted
    let again = job.run(&RunOptions::default()).await.expect("second run");
    assert_eq!(again.unchanged, 1);
}

#[tokio::test]
async fn limit_caps_submissions() {
    let store = Arc::new(MemoryStore::new());
    let mut sink = MockDocumentSink::new();
    sink.expect_submit()
        .times(2)
        .returning(|_, _, _| Ok("GD".to_string()));
    let items = vec![shipment("S-6", 1.0), shipment("S-7", 1.0), shipment("S-8", 1.0)];
    let options = RunOptions {
        limit: Some(2),
        ..RunOptions::default()
    };

    let report = job(&store, polling(items), sink)
        .run(&options)
        .await
        .expect("run");

    assert_eq!(report.fetched, 2);
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn failed_item_stays_in_the_poll_window_after_a_later_success() {
    let store = Arc::new(MemoryStore::new());
    let x = completed_at("S-X", now() - Duration::hours(7));
    let y = completed_at("S-Y", now() - Duration::hours(6));
    let polls = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = polls.clone();
    let mut source = MockCompletedItemSource::new();
    source.expect_poll_completed().returning(move |_, _, since| {
        seen.lock().unwrap().push(since);
        Ok([x.clone(), y.clone()]
            .into_iter()
            .filter(|item| item.completed_at.is_some_and(|at| at >= since))
            .collect())
    });
    source.expect_mark_processed().returning(|_, _, _| Ok(()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut sink = MockDocumentSink::new();
    // S-X is polled first and its first submission fails
    sink.expect_submit().returning(move |_, _, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("503 Service Unavailable".into())
        } else {
            Ok("GD".to_string())
        }
    });
    let clock = Arc::new(ManualClock::new(now()));
    let job = UploadJob::new(
        Scope::new("2001"),
        UploadFlow::Shipments,
        Arc::new(source),
        Arc::new(sink),
        store.clone(),
    )
    .with_clock(clock.clone());

    let first = job.run(&RunOptions::default()).await.expect("first run");
    assert_eq!(first.outcome, RunOutcome::PartialSuccess);

    clock.advance(Duration::minutes(5));
    let second = job.run(&RunOptions::default()).await.expect("second run");

    assert_eq!(polls.lock().unwrap()[1], now() - Duration::hours(7));
    assert_eq!(second.written, 1);
    assert_eq!(second.unchanged, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let row = store
        .get_upload(&Scope::new("2001"), UploadFlow::Shipments, "S-X")
        .await
        .expect("store")
        .expect("row");
    assert_eq!(row.status, UploadStatus::Success);
}

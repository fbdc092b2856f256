//! Integration tests for cooperative cancellation of range runs

use chrono::DateTime;
use grid_data_fetcher::cancel::Cancellation;
use grid_data_fetcher::fetcher::{window_fn, FetchError, RetryPolicy, RetryingFetch};
use grid_data_fetcher::range::{
    OrchestratorState, QueryContext, RangeError, RangeOrchestrator, RangeSpec, Timestamp, Window,
};
use grid_data_fetcher::Table;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

fn week() -> RangeSpec {
    RangeSpec::days(ts("2024-01-01T00:00:00Z"), ts("2024-01-08T00:00:00Z"), 1)
}

#[tokio::test]
async fn test_cancelled_before_start_fetches_nothing() {
    let cancellation = Cancellation::new();
    cancellation.cancel();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = window_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Table::new(["Time"])) }
    });

    let orchestrator = RangeOrchestrator::new().with_cancellation(cancellation);
    let err = orchestrator
        .run(&fetcher, week(), None, &QueryContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RangeError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);
}

#[tokio::test]
async fn test_cancel_between_windows_stops_run() {
    let cancellation = Cancellation::new();
    let trigger = cancellation.clone();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = window_fn(move |_window: Window| {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            trigger.cancel();
        }
        async { Ok(Table::new(["Time"])) }
    });

    let err = RangeOrchestrator::new()
        .with_cancellation(cancellation)
        .run(&fetcher, week(), None, &QueryContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RangeError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let cancellation = Cancellation::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let fetcher = window_fn(|_| async { Err(FetchError::Network("connection refused".into())) });
    let orchestrator = RangeOrchestrator::new()
        .with_cancellation(cancellation)
        .with_retry(RetryingFetch::new(RetryPolicy::new(
            5,
            Duration::from_secs(60),
            2.0,
        )));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&fetcher, week(), None, &QueryContext::new()),
    )
    .await
    .expect("run did not observe cancellation")
    .unwrap_err();

    assert!(matches!(err, RangeError::Cancelled));
}

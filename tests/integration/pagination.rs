//! Integration tests for concurrent pagination

use chrono::DateTime;
use grid_data_fetcher::fetcher::{
    page_fn, ConcurrentPaginator, FetchError, NoopSleeper, Page, PageRequest,
    PaginatedWindowFetcher, RetryPolicy, RetryingFetch,
};
use grid_data_fetcher::range::{
    ProgressSink, QueryContext, RangeOrchestrator, RangeSpec, Timestamp, Window,
};
use grid_data_fetcher::Table;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

/// Rows `offset..offset+limit` of a dataset with `total` records
fn slice(request: PageRequest, total: u64) -> Table {
    let end = (request.offset + request.limit).min(total);
    let rows = (request.offset..end).map(|i| vec![json!(i)]).collect();
    Table::with_rows(["id"], rows).unwrap()
}

fn ids(table: &Table) -> Vec<u64> {
    table
        .column("id")
        .unwrap()
        .into_iter()
        .map(|v| v.as_u64().unwrap())
        .collect()
}

#[derive(Default)]
struct PageLog {
    requested: Mutex<Vec<u64>>,
    completed: Mutex<Vec<u64>>,
}

#[tokio::test]
async fn test_three_pages_merge_in_page_order() {
    let log = Arc::new(PageLog::default());
    let tracker = log.clone();

    let fetcher = page_fn(move |request: PageRequest| {
        let tracker = tracker.clone();
        async move {
            tracker.requested.lock().unwrap().push(request.index);
            // page 1 finishes after page 2
            let delay = if request.index == 1 { 80 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tracker.completed.lock().unwrap().push(request.index);
            Ok(Page::new(slice(request, 12_500), 12_500))
        }
    });

    let paginator = ConcurrentPaginator::new(5000).with_workers(4);
    let (table, state) = paginator.fetch_all_with_state(&fetcher).await.unwrap();

    assert_eq!(log.requested.lock().unwrap().len(), 3);
    assert_eq!(*log.completed.lock().unwrap(), vec![0, 2, 1]);
    assert_eq!(state.pages_fetched, 3);
    assert_eq!(state.total_pages(), 3);

    assert_eq!(table.len(), 12_500);
    assert_eq!(ids(&table), (0..12_500).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_total_within_one_page_is_single_request() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = page_fn(move |request: PageRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Page::new(slice(request, 4_000), 4_000)) }
    });

    let table = ConcurrentPaginator::new(5000)
        .fetch_all(&fetcher)
        .await
        .unwrap();

    assert_eq!(table.len(), 4_000);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_worker_limit_bounds_concurrency() {
    let in_flight = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let (current, high) = (in_flight.clone(), peak.clone());

    let fetcher = page_fn(move |request: PageRequest| {
        let (current, high) = (current.clone(), high.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            high.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(Page::new(slice(request, 100), 100))
        }
    });

    let table = ConcurrentPaginator::new(10)
        .with_workers(2)
        .fetch_all(&fetcher)
        .await
        .unwrap();

    assert_eq!(table.len(), 100);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_failing_page_fails_whole_fetch() {
    let fetcher = page_fn(|request: PageRequest| async move {
        if request.index == 2 {
            Err(FetchError::Parse("truncated body".into()))
        } else {
            Ok(Page::new(slice(request, 40), 40))
        }
    });

    let err = ConcurrentPaginator::new(10)
        .with_retry(RetryingFetch::new(RetryPolicy::default()).with_sleeper(Arc::new(NoopSleeper)))
        .fetch_all(&fetcher)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Parse(_)));
}

#[tokio::test]
async fn test_transient_page_error_is_retried() {
    let failed = Arc::new(AtomicU32::new(0));
    let flag = failed.clone();
    let fetcher = page_fn(move |request: PageRequest| {
        let first_failure = request.index == 1 && flag.fetch_add(1, Ordering::SeqCst) == 0;
        async move {
            if first_failure {
                Err(FetchError::Http {
                    status: 502,
                    message: "Bad Gateway".into(),
                })
            } else {
                Ok(Page::new(slice(request, 25), 25))
            }
        }
    });

    let table = ConcurrentPaginator::new(10)
        .with_retry(RetryingFetch::new(RetryPolicy::default()).with_sleeper(Arc::new(NoopSleeper)))
        .fetch_all(&fetcher)
        .await
        .unwrap();

    assert_eq!(ids(&table), (0..25).collect::<Vec<u64>>());
    // page 1 requested twice
    assert_eq!(failed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_progress_counts_pages() {
    #[derive(Default)]
    struct Pages(Mutex<Vec<(usize, usize)>>);

    impl ProgressSink for Pages {
        fn on_progress(&self, completed: usize, total: usize) {
            self.0.lock().unwrap().push((completed, total));
        }
    }

    let progress = Arc::new(Pages::default());
    let fetcher =
        page_fn(|request: PageRequest| async move { Ok(Page::new(slice(request, 30), 30)) });

    ConcurrentPaginator::new(10)
        .with_progress(progress.clone())
        .fetch_all(&fetcher)
        .await
        .unwrap();

    let updates = progress.0.lock().unwrap().clone();
    assert_eq!(updates.first(), Some(&(1, 3)));
    assert_eq!(updates.last(), Some(&(3, 3)));
}

#[tokio::test]
async fn test_paginated_windows_through_orchestrator() {
    let fetcher = PaginatedWindowFetcher::new(
        ConcurrentPaginator::new(24),
        |window: Window, request: PageRequest| async move {
            let hours = window.duration().num_hours().max(0) as u64;
            let end = (request.offset + request.limit).min(hours);
            let rows = (request.offset..end)
                .map(|h| {
                    let at = window.start + chrono::Duration::hours(h as i64);
                    vec![json!(at.to_rfc3339())]
                })
                .collect();
            Ok(Page::new(Table::with_rows(["Time"], rows).unwrap(), hours))
        },
    );

    let table = RangeOrchestrator::new()
        .run(
            &fetcher,
            RangeSpec::days(ts("2024-02-01T00:00:00Z"), ts("2024-02-08T00:00:00Z"), 3),
            None,
            &QueryContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(table.len(), 7 * 24);
    let times = table.column("Time").unwrap();
    assert_eq!(times[0], &json!("2024-02-01T00:00:00+00:00"));
    assert_eq!(times[7 * 24 - 1], &json!("2024-02-07T23:00:00+00:00"));
}

//! Unit tests for the retry wrapper

use grid_data_fetcher::cancel::Cancellation;
use grid_data_fetcher::fetcher::{
    FetchError, NoopSleeper, RecordingSleeper, RetryPolicy, RetryingFetch,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Operation failing transiently `failures` times before returning its attempt number
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    async fn call(&self) -> Result<u32, FetchError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(FetchError::Http {
                status: 503,
                message: "Service Unavailable".to_string(),
            })
        } else {
            Ok(attempt)
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_two_failures_then_success_records_two_delays() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let retry = RetryingFetch::new(RetryPolicy::new(3, Duration::from_secs(1), 2.0))
        .with_sleeper(sleeper.clone());
    let flaky = Flaky::new(2);

    let attempt = retry.call(|| flaky.call()).await.unwrap();

    assert_eq!(attempt, 3);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn test_always_failing_exhausts_after_max_attempts() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let retry = RetryingFetch::new(RetryPolicy::new(4, Duration::from_millis(100), 3.0))
        .with_sleeper(sleeper.clone());
    let flaky = Flaky::new(u32::MAX);

    let err = retry.call(|| flaky.call()).await.unwrap_err();

    match err {
        FetchError::Exhausted { attempts, source } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*source, FetchError::Http { status: 503, .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(flaky.calls(), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(900),
        ]
    );
}

#[tokio::test]
async fn test_single_attempt_policy_never_sleeps() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let retry = RetryingFetch::new(RetryPolicy::no_retry()).with_sleeper(sleeper.clone());
    let flaky = Flaky::new(1);

    let err = retry.call(|| flaky.call()).await.unwrap_err();

    assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let retry = RetryingFetch::new(RetryPolicy::default()).with_sleeper(Arc::new(NoopSleeper));
    let calls = AtomicU32::new(0);

    let err = retry
        .call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(FetchError::Http {
                    status: 404,
                    message: "Not Found".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Http { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rate_limited_is_retried() {
    let retry = RetryingFetch::new(RetryPolicy::default()).with_sleeper(Arc::new(NoopSleeper));
    let calls = AtomicU32::new(0);

    let value = retry
        .call(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FetchError::RateLimited)
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let cancellation = Cancellation::new();
    let retry = RetryingFetch::new(RetryPolicy::new(5, Duration::from_secs(60), 2.0))
        .with_cancellation(cancellation.clone());
    let flaky = Flaky::new(u32::MAX);

    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), retry.call(|| flaky.call()))
        .await
        .expect("backoff was not interrupted")
        .unwrap_err();

    assert!(matches!(err, FetchError::Cancelled));
    assert_eq!(flaky.calls(), 1);
}

//! End-to-end tests for provider methods built on `RangeMethod`

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use grid_data_fetcher::config::FetchConfig;
use grid_data_fetcher::fetcher::{window_fn, NoopSleeper, RetryingFetch};
use grid_data_fetcher::range::{
    ArchiveCutoverRule, ChainedRules, DateRequest, DateSpec, QueryContext, RangeError,
    RangeMethod, RangeOrchestrator, Timestamp, Window, WindowStep, YearBoundaryRule,
};
use grid_data_fetcher::Table;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

fn central() -> Tz {
    chrono_tz::US::Central
}

type Seen = Arc<Mutex<Vec<Window>>>;

/// Fetcher returning one row per window and logging each request
fn recording_fetcher(
    seen: Seen,
) -> impl grid_data_fetcher::fetcher::WindowFetcher {
    window_fn(move |window: Window| {
        seen.lock().unwrap().push(window);
        async move {
            Ok(Table::with_rows(
                ["Interval Start", "Interval End"],
                vec![vec![
                    json!(window.start.to_rfc3339()),
                    json!(window.end.to_rfc3339()),
                ]],
            )
            .unwrap())
        }
    })
}

#[tokio::test]
async fn test_year_spanning_range_from_strings() {
    let seen: Seen = Arc::default();
    let method = RangeMethod::new(recording_fetcher(seen.clone()), WindowStep::Days(365))
        .with_rule(YearBoundaryRule);

    let context = QueryContext::new().with_timezone(central());
    let request = DateRequest::range(
        DateSpec::parse("2023-12-28", central()).unwrap(),
        DateSpec::parse("2024-01-03", central()).unwrap(),
    );

    let table = method.fetch(&request, &context).await.unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Window::new(ts("2023-12-28T00:00:00-06:00"), ts("2023-12-31T23:59:00-06:00")).unwrap(),
            Window::new(ts("2024-01-01T00:00:00-06:00"), ts("2024-01-03T00:00:00-06:00")).unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_market_dependent_step_and_cutover() {
    let seen: Seen = Arc::default();
    let now = ts("2024-03-20T12:00:00-06:00");

    let method = RangeMethod::new(recording_fetcher(seen.clone()), WindowStep::Days(31))
        .with_step_fn(|ctx| match ctx.param("market") {
            Some("REAL_TIME_HOURLY") => WindowStep::Days(7),
            _ => WindowStep::Days(31),
        })
        .with_rule(
            ChainedRules::new()
                .then(
                    ArchiveCutoverRule::by_lookback("market", now)
                        .with_lookback("REAL_TIME_HOURLY", 10),
                )
                .then(YearBoundaryRule),
        )
        .with_clock(move || now.with_timezone(&Utc));

    let context = QueryContext::new()
        .with_timezone(central())
        .with_param("market", "REAL_TIME_HOURLY");
    let request = DateRequest::range(ts("2024-02-20T00:00:00-06:00"), DateSpec::Today);

    method.fetch(&request, &context).await.unwrap();

    let windows = seen.lock().unwrap().clone();
    let cutover = ts("2024-03-10T00:00:00-06:00");

    assert!(windows.iter().all(|w| w.duration() <= chrono::Duration::days(7)));
    assert!(windows.iter().all(|w| !w.spans(cutover)));
    assert!(windows.iter().any(|w| w.start == cutover));
    assert_eq!(windows.first().unwrap().start, ts("2024-02-20T00:00:00-06:00"));
    // daylight saving started on March 10
    assert_eq!(windows.last().unwrap().end, ts("2024-03-21T00:00:00-05:00"));
}

#[tokio::test]
async fn test_day_start_windows_follow_local_midnight_across_dst() {
    let seen: Seen = Arc::default();
    let method = RangeMethod::new(recording_fetcher(seen.clone()), WindowStep::DayStart);

    let context = QueryContext::new().with_timezone(chrono_tz::US::Eastern);
    let request = DateRequest::range(
        DateSpec::parse("2024-11-02", context.timezone()).unwrap(),
        DateSpec::parse("2024-11-05", context.timezone()).unwrap(),
    );
    let table = method.fetch(&request, &context).await.unwrap();

    let starts: Vec<String> = table
        .column("Interval Start")
        .unwrap()
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        starts,
        vec![
            "2024-11-02T00:00:00-04:00",
            "2024-11-03T00:00:00-04:00",
            "2024-11-04T00:00:00-05:00",
        ]
    );

    let hours: Vec<i64> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|w| w.duration().num_hours())
        .collect();
    assert_eq!(hours, vec![24, 25, 24]);
}

#[tokio::test]
async fn test_configured_retry_drives_method() {
    let config = FetchConfig::from_json(r#"{"retry": {"max_attempts": 2}}"#).unwrap();
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();

    let fetcher = window_fn(move |_window: Window| {
        *counter.lock().unwrap() += 1;
        async {
            Err(grid_data_fetcher::FetchError::Http {
                status: 500,
                message: "Internal Server Error".into(),
            })
        }
    });

    let orchestrator = RangeOrchestrator::new().with_retry(
        RetryingFetch::new(config.retry.policy()).with_sleeper(Arc::new(NoopSleeper)),
    );
    let method = RangeMethod::new(fetcher, WindowStep::Days(1)).with_orchestrator(orchestrator);

    let err = method
        .fetch(
            &DateRequest::date(ts("2024-05-05T00:00:00Z")),
            &QueryContext::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RangeError::FetchExhausted { attempts: 2, .. }));
    assert_eq!(*attempts.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_conflicting_arguments_rejected() {
    let seen: Seen = Arc::default();
    let method = RangeMethod::new(recording_fetcher(seen.clone()), WindowStep::Days(1));

    let request = DateRequest {
        date: Some(DateSpec::Today),
        start: Some(DateSpec::Today),
        end: None,
    };
    let err = method
        .fetch(&request, &QueryContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RangeError::InvalidArguments(_)));
    assert!(seen.lock().unwrap().is_empty());
}

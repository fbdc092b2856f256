//! Unit tests for provider boundary rules

use chrono::DateTime;
use grid_data_fetcher::range::{
    split_days, validate_boundaries, windows_between, ArchiveCutoverRule, BoundaryRule,
    ChainedRules, DateBoundary, QueryContext, RangeError, Timestamp, YearBoundaryRule,
};

fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

#[test]
fn test_year_rule_over_new_year() {
    let boundaries = split_days(ts("2023-12-28T00:00:00Z"), ts("2024-01-03T00:00:00Z"), 365).unwrap();
    let adjusted = YearBoundaryRule
        .apply(boundaries, &QueryContext::new())
        .unwrap();

    assert_eq!(
        adjusted,
        vec![
            DateBoundary::At(ts("2023-12-28T00:00:00Z")),
            DateBoundary::At(ts("2023-12-31T23:59:00Z")),
            DateBoundary::Gap,
            DateBoundary::At(ts("2024-01-01T00:00:00Z")),
            DateBoundary::At(ts("2024-01-03T00:00:00Z")),
        ]
    );
    validate_boundaries(&adjusted).unwrap();
}

#[test]
fn test_year_rule_with_daily_steps_never_crosses_year() {
    let boundaries = split_days(ts("2023-12-28T00:00:00Z"), ts("2024-01-03T00:00:00Z"), 1).unwrap();
    let adjusted = YearBoundaryRule
        .apply(boundaries, &QueryContext::new())
        .unwrap();
    validate_boundaries(&adjusted).unwrap();

    let new_year = ts("2024-01-01T00:00:00Z");
    let windows = windows_between(&adjusted);
    assert_eq!(windows.len(), 6);
    assert!(windows.iter().all(|w| !w.spans(new_year)));
    assert!(windows.iter().any(|w| w.start == new_year));
    assert!(windows.iter().any(|w| w.end == ts("2023-12-31T23:59:00Z")));
}

#[test]
fn test_year_rule_multi_year() {
    let boundaries = split_days(ts("2021-06-01T00:00:00Z"), ts("2023-06-01T00:00:00Z"), 3650).unwrap();
    let adjusted = YearBoundaryRule
        .apply(boundaries, &QueryContext::new())
        .unwrap();

    assert_eq!(adjusted.iter().filter(|b| b.is_gap()).count(), 2);
    assert_eq!(windows_between(&adjusted).len(), 3);
}

#[test]
fn test_year_rule_within_one_year_is_identity() {
    let boundaries = split_days(ts("2024-02-01T00:00:00Z"), ts("2024-03-01T00:00:00Z"), 7).unwrap();
    let adjusted = YearBoundaryRule
        .apply(boundaries.clone(), &QueryContext::new())
        .unwrap();
    assert_eq!(adjusted, boundaries);
}

#[test]
fn test_archive_cutover_splits_range() {
    let rule = ArchiveCutoverRule::fixed(ts("2024-03-10T00:00:00-05:00"));
    let boundaries = split_days(
        ts("2024-03-01T00:00:00-05:00"),
        ts("2024-03-20T00:00:00-05:00"),
        30,
    )
    .unwrap();

    let adjusted = rule
        .apply(
            boundaries,
            &QueryContext::new().with_timezone(chrono_tz::US::Eastern),
        )
        .unwrap();

    assert_eq!(
        adjusted,
        vec![
            DateBoundary::At(ts("2024-03-01T00:00:00-05:00")),
            DateBoundary::At(ts("2024-03-09T23:59:00-05:00")),
            DateBoundary::Gap,
            DateBoundary::At(ts("2024-03-10T00:00:00-05:00")),
            DateBoundary::At(ts("2024-03-20T00:00:00-05:00")),
        ]
    );
}

#[test]
fn test_archive_cutover_outside_range_is_identity() {
    let rule = ArchiveCutoverRule::fixed(ts("2025-01-01T00:00:00Z"));
    let boundaries = split_days(ts("2024-03-01T00:00:00Z"), ts("2024-03-20T00:00:00Z"), 5).unwrap();

    let adjusted = rule
        .apply(boundaries.clone(), &QueryContext::new())
        .unwrap();
    assert_eq!(adjusted, boundaries);
}

#[test]
fn test_lookback_only_for_registered_markets() {
    let rule = ArchiveCutoverRule::by_lookback("market", ts("2024-07-01T12:00:00Z"))
        .with_lookback("REAL_TIME_HOURLY", 30);

    let with_market = QueryContext::new().with_param("market", "REAL_TIME_HOURLY");
    assert_eq!(
        rule.cutover_for(&with_market).unwrap(),
        Some(ts("2024-06-01T00:00:00Z"))
    );

    let other = QueryContext::new().with_param("market", "DAY_AHEAD_HOURLY");
    assert_eq!(rule.cutover_for(&other).unwrap(), None);
}

#[test]
fn test_chained_rules_apply_in_order() {
    let chain = ChainedRules::new()
        .then(ArchiveCutoverRule::fixed(ts("2024-01-15T00:00:00Z")))
        .then(YearBoundaryRule);
    let boundaries = split_days(ts("2023-12-20T00:00:00Z"), ts("2024-01-25T00:00:00Z"), 365).unwrap();

    let adjusted = chain.apply(boundaries, &QueryContext::new()).unwrap();
    validate_boundaries(&adjusted).unwrap();

    assert_eq!(adjusted.iter().filter(|b| b.is_gap()).count(), 2);
    assert_eq!(windows_between(&adjusted).len(), 3);
}

#[test]
fn test_validation_rejects_malformed_sequences() {
    let a = DateBoundary::At(ts("2024-01-01T00:00:00Z"));
    let b = DateBoundary::At(ts("2024-01-02T00:00:00Z"));

    let cases = [
        vec![],
        vec![DateBoundary::Gap, a, b],
        vec![a, b, DateBoundary::Gap],
        vec![a, DateBoundary::Gap, DateBoundary::Gap, b],
        vec![b, a],
    ];

    for case in cases {
        assert!(matches!(
            validate_boundaries(&case),
            Err(RangeError::BoundaryOrdering(_))
        ));
    }
}

//! Provider boundary rules.
//!
//! A rule receives the splitter's boundary sequence once and may insert
//! forced split points and [`DateBoundary::Gap`] markers. The orchestrator
//! validates the result with [`validate_boundaries`].

use crate::range::{
    local_midnight, local_time, DateBoundary, QueryContext, RangeError, RangeResult, Timestamp,
};
use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Strategy that reshapes a boundary sequence
pub trait BoundaryRule: Send + Sync {
    /// Return the adjusted sequence
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>>;
}

impl<R: BoundaryRule + ?Sized> BoundaryRule for Arc<R> {
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        (**self).apply(boundaries, context)
    }
}

/// No request may span a calendar-year boundary.
///
/// Between two boundaries in different local years this inserts
/// `Dec 31 23:59, Gap, Jan 1 00:00` for every year crossed, on the context's
/// calendar. The year start is omitted when it equals the next boundary, and
/// the year end when the earlier boundary is already past it.
#[derive(Debug, Clone, Copy, Default)]
pub struct YearBoundaryRule;

impl BoundaryRule for YearBoundaryRule {
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        let tz = context.timezone();
        let mut out = Vec::with_capacity(boundaries.len());

        for (i, boundary) in boundaries.iter().enumerate() {
            out.push(*boundary);

            let (DateBoundary::At(current), Some(DateBoundary::At(next))) =
                (boundary, boundaries.get(i + 1))
            else {
                continue;
            };

            let next_year = next.with_timezone(&tz).year();
            for year in current.with_timezone(&tz).year()..next_year {
                let year_end = calendar_point(year, 12, 31, 23, 59, tz)?;
                let year_start = calendar_point(year + 1, 1, 1, 0, 0, tz)?;

                if last_instant(&out).is_some_and(|last| last < year_end) {
                    out.push(DateBoundary::At(year_end));
                }
                out.push(DateBoundary::Gap);
                if year_start != *next {
                    out.push(DateBoundary::At(year_start));
                }

                debug!(year, "Inserted year boundary");
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Clone)]
enum Cutover {
    Fixed(Timestamp),
    Lookback {
        param: String,
        lookback_days: BTreeMap<String, i64>,
        now: Timestamp,
    },
}

/// Split at the date an archive API hands over to the live one.
///
/// When the cutover lies strictly between two boundaries this inserts
/// `day-before-cutover 23:59, Gap, cutover`.
#[derive(Debug, Clone)]
pub struct ArchiveCutoverRule {
    cutover: Cutover,
}

impl ArchiveCutoverRule {
    /// Cutover at a fixed instant
    pub fn fixed(cutover: Timestamp) -> Self {
        Self {
            cutover: Cutover::Fixed(cutover),
        }
    }

    /// Cutover derived from a per-market lookback.
    ///
    /// The market is read from context parameter `param`; the cutover is
    /// local midnight, in the context's time zone, of `now - lookback_days`.
    /// Markets without a lookback have no cutover.
    pub fn by_lookback(param: impl Into<String>, now: Timestamp) -> Self {
        Self {
            cutover: Cutover::Lookback {
                param: param.into(),
                lookback_days: BTreeMap::new(),
                now,
            },
        }
    }

    /// Register a lookback in days for `market`
    pub fn with_lookback(mut self, market: impl Into<String>, days: i64) -> Self {
        if let Cutover::Lookback { lookback_days, .. } = &mut self.cutover {
            lookback_days.insert(market.into(), days);
        }
        self
    }

    /// Cutover instant for `context`, if any
    pub fn cutover_for(&self, context: &QueryContext) -> RangeResult<Option<Timestamp>> {
        match &self.cutover {
            Cutover::Fixed(t) => Ok(Some(*t)),
            Cutover::Lookback {
                param,
                lookback_days,
                now,
            } => {
                let Some(days) = context.param(param).and_then(|m| lookback_days.get(m)) else {
                    return Ok(None);
                };

                let day = now
                    .with_timezone(&context.timezone())
                    .date_naive()
                    .checked_sub_days(chrono::Days::new(days.unsigned_abs()))
                    .ok_or_else(|| overflow("archive cutover"))?;
                local_midnight(day, context.timezone())
                    .map(Some)
                    .ok_or_else(|| overflow("archive cutover"))
            }
        }
    }
}

impl BoundaryRule for ArchiveCutoverRule {
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        let Some(cutover) = self.cutover_for(context)? else {
            return Ok(boundaries);
        };

        let tz = context.timezone();
        let day_before = cutover
            .with_timezone(&tz)
            .date_naive()
            .pred_opt()
            .and_then(|d| local_time(d, 23, 59, tz))
            .ok_or_else(|| overflow("archive cutover"))?;

        let mut out = Vec::with_capacity(boundaries.len() + 3);
        for (i, boundary) in boundaries.iter().enumerate() {
            out.push(*boundary);

            let (DateBoundary::At(current), Some(DateBoundary::At(next))) =
                (boundary, boundaries.get(i + 1))
            else {
                continue;
            };

            if *current < cutover && cutover < *next {
                if *current < day_before {
                    out.push(DateBoundary::At(day_before));
                }
                out.push(DateBoundary::Gap);
                out.push(DateBoundary::At(cutover));
                debug!(cutover = %cutover, "Inserted archive cutover");
            }
        }

        Ok(out)
    }
}

/// Several rules applied in order as one
#[derive(Clone, Default)]
pub struct ChainedRules {
    rules: Vec<Arc<dyn BoundaryRule>>,
}

impl ChainedRules {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule
    pub fn then(mut self, rule: impl BoundaryRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }
}

impl BoundaryRule for ChainedRules {
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        self.rules
            .iter()
            .try_fold(boundaries, |acc, rule| rule.apply(acc, context))
    }
}

/// [`BoundaryRule`] backed by a closure
pub struct RuleFn<F>(F);

/// Wrap a closure as a [`BoundaryRule`]
pub fn rule_fn<F>(f: F) -> RuleFn<F>
where
    F: Fn(Vec<DateBoundary>, &QueryContext) -> RangeResult<Vec<DateBoundary>> + Send + Sync,
{
    RuleFn(f)
}

impl<F> BoundaryRule for RuleFn<F>
where
    F: Fn(Vec<DateBoundary>, &QueryContext) -> RangeResult<Vec<DateBoundary>> + Send + Sync,
{
    fn apply(
        &self,
        boundaries: Vec<DateBoundary>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        (self.0)(boundaries, context)
    }
}

/// Check gap placement and ordering of a boundary sequence
pub fn validate_boundaries(boundaries: &[DateBoundary]) -> RangeResult<()> {
    match (boundaries.first(), boundaries.last()) {
        (None, _) | (_, None) => {
            return Err(RangeError::BoundaryOrdering(
                "boundary sequence is empty".to_string(),
            ))
        }
        (Some(DateBoundary::Gap), _) => {
            return Err(RangeError::BoundaryOrdering(
                "sequence starts with a gap".to_string(),
            ))
        }
        (_, Some(DateBoundary::Gap)) => {
            return Err(RangeError::BoundaryOrdering(
                "sequence ends with a gap".to_string(),
            ))
        }
        _ => {}
    }

    let mut previous: Option<Timestamp> = None;
    for (i, pair) in boundaries.windows(2).enumerate() {
        if pair[0].is_gap() && pair[1].is_gap() {
            return Err(RangeError::BoundaryOrdering(format!(
                "adjacent gaps at positions {i} and {}",
                i + 1
            )));
        }
    }

    for boundary in boundaries {
        if let DateBoundary::At(t) = boundary {
            if let Some(prev) = previous {
                if *t < prev {
                    return Err(RangeError::BoundaryOrdering(format!(
                        "{} follows {}",
                        t.to_rfc3339(),
                        prev.to_rfc3339()
                    )));
                }
            }
            previous = Some(*t);
        }
    }

    Ok(())
}

fn last_instant(boundaries: &[DateBoundary]) -> Option<Timestamp> {
    boundaries.iter().rev().find_map(DateBoundary::instant)
}

fn calendar_point(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    tz: Tz,
) -> RangeResult<Timestamp> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| local_time(d, hour, minute, tz))
        .ok_or_else(|| overflow("year boundary"))
}

fn overflow(what: &str) -> RangeError {
    RangeError::InvalidArguments(format!("{what} is outside the supported calendar"))
}

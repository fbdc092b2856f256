//! Splitting a date range into bounded windows

use crate::range::{in_zone, local_midnight, DateBoundary, RangeError, RangeResult, Timestamp};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// Distance between consecutive window boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStep {
    /// Fixed number of 24-hour days
    Days(u32),
    /// Fixed duration
    Span(chrono::Duration),
    /// Next local midnight
    DayStart,
    /// Next whole hour
    HourStart,
    /// Next five-minute mark
    FiveMinute,
    /// First day of the next month
    MonthStart,
    /// January 1 of the next year
    YearStart,
    /// No intermediate boundaries
    Unbounded,
}

impl WindowStep {
    /// Next boundary strictly after `from`, or `None` on calendar overflow.
    ///
    /// Calendar steps land on wall-clock midnights in `tz`; every result is
    /// expressed with the offset `tz` uses at that instant.
    pub fn advance(&self, from: Timestamp, tz: Tz) -> Option<Timestamp> {
        let local = from.with_timezone(&tz);
        let next = match self {
            WindowStep::Days(n) => from.checked_add_signed(chrono::Duration::days(i64::from(*n)))?,
            WindowStep::Span(span) => from.checked_add_signed(*span)?,
            WindowStep::DayStart => local_midnight(local.date_naive().succ_opt()?, tz)?,
            WindowStep::MonthStart => {
                let first = local.date_naive().with_day(1)?;
                local_midnight(first.checked_add_months(Months::new(1))?, tz)?
            }
            WindowStep::YearStart => {
                local_midnight(NaiveDate::from_ymd_opt(local.year() + 1, 1, 1)?, tz)?
            }
            WindowStep::HourStart => ceil_to(from, 3600)?,
            WindowStep::FiveMinute => ceil_to(from, 300)?,
            WindowStep::Unbounded => return None,
        };
        Some(in_zone(next, tz))
    }

    /// Whether windows are shorter than one day
    pub fn is_sub_daily(&self) -> bool {
        match self {
            WindowStep::HourStart | WindowStep::FiveMinute => true,
            WindowStep::Span(span) => *span < chrono::Duration::days(1),
            _ => false,
        }
    }

    fn validate(&self) -> RangeResult<()> {
        match self {
            WindowStep::Days(0) => Err(RangeError::InvalidArguments(
                "window step must be at least one day".to_string(),
            )),
            WindowStep::Span(span) if *span <= chrono::Duration::zero() => Err(
                RangeError::InvalidArguments(format!("window span must be positive, got {span}")),
            ),
            _ => Ok(()),
        }
    }
}

/// Next multiple of `step_secs` on the UTC epoch strictly after `from`
fn ceil_to(from: Timestamp, step_secs: i64) -> Option<Timestamp> {
    let next = (from.timestamp().div_euclid(step_secs) + 1).checked_mul(step_secs)?;
    DateTime::<Utc>::from_timestamp_millis(next.checked_mul(1000)?)
        .map(|t| t.with_timezone(from.offset()))
}

impl FromStr for WindowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY_START" => Ok(WindowStep::DayStart),
            "HOUR_START" => Ok(WindowStep::HourStart),
            "5_MIN" => Ok(WindowStep::FiveMinute),
            "MONTH_START" => Ok(WindowStep::MonthStart),
            "YEAR_START" => Ok(WindowStep::YearStart),
            "NONE" | "none" => Ok(WindowStep::Unbounded),
            _ => s
                .strip_suffix('D')
                .and_then(|days| days.parse::<u32>().ok())
                .map(WindowStep::Days)
                .ok_or_else(|| format!("Invalid window step: {s}")),
        }
    }
}

impl fmt::Display for WindowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowStep::Days(n) => write!(f, "{n}D"),
            WindowStep::Span(span) => write!(f, "{}s", span.num_seconds()),
            WindowStep::DayStart => write!(f, "DAY_START"),
            WindowStep::HourStart => write!(f, "HOUR_START"),
            WindowStep::FiveMinute => write!(f, "5_MIN"),
            WindowStep::MonthStart => write!(f, "MONTH_START"),
            WindowStep::YearStart => write!(f, "YEAR_START"),
            WindowStep::Unbounded => write!(f, "NONE"),
        }
    }
}

/// Produces boundary sequences for one window step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSplitter {
    step: WindowStep,
    timezone: Tz,
}

impl WindowSplitter {
    /// Splitter advancing by `step` on the UTC calendar
    pub fn new(step: WindowStep) -> Self {
        Self {
            step,
            timezone: Tz::UTC,
        }
    }

    /// Place calendar steps on wall-clock boundaries in `timezone`
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Window step
    pub fn step(&self) -> WindowStep {
        self.step
    }

    /// Boundaries `start, start+step, ..., end`.
    ///
    /// The last element is exactly `end` even when the final step overshoots;
    /// `start == end` yields `[start, end]`.
    pub fn split(&self, start: Timestamp, end: Timestamp) -> RangeResult<Vec<DateBoundary>> {
        if end < start {
            return Err(RangeError::InvalidRange { start, end });
        }
        self.step.validate()?;

        let mut boundaries = vec![DateBoundary::At(start)];
        if self.step != WindowStep::Unbounded {
            let mut current = self.advance(start)?;
            while current < end {
                boundaries.push(DateBoundary::At(current));
                current = self.advance(current)?;
            }
        }
        boundaries.push(DateBoundary::At(end));

        Ok(boundaries)
    }

    fn advance(&self, from: Timestamp) -> RangeResult<Timestamp> {
        match self.step.advance(from, self.timezone) {
            Some(next) if next > from => Ok(next),
            _ => Err(RangeError::InvalidArguments(format!(
                "window step {} cannot advance past {}",
                self.step,
                from.to_rfc3339()
            ))),
        }
    }
}

/// Day-count split: windows of at most `max_window_days` days
pub fn split_days(
    start: Timestamp,
    end: Timestamp,
    max_window_days: u32,
) -> RangeResult<Vec<DateBoundary>> {
    WindowSplitter::new(WindowStep::Days(max_window_days)).split(start, end)
}

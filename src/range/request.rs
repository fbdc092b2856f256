//! Date arguments of provider methods.
//!
//! A request carries either a single `date` or a `start`, plus an optional
//! `end`. Dates may be concrete instants or the `latest` and `today`
//! sentinels; [`DateRequest::resolve`] turns them into what the orchestrator
//! needs.

use crate::range::splitter::WindowStep;
use crate::range::{in_zone, local_midnight, local_time, RangeError, RangeResult, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

/// One date argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    /// Most recent data the provider publishes
    Latest,
    /// Local midnight of the current day
    Today,
    /// Concrete instant
    At(Timestamp),
}

impl DateSpec {
    /// Parse `latest`, `today`, RFC 3339, `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD`.
    ///
    /// Inputs without an offset are wall-clock times in `tz`.
    pub fn parse(input: &str, tz: Tz) -> RangeResult<Self> {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "latest" => return Ok(DateSpec::Latest),
            "today" => return Ok(DateSpec::Today),
            _ => {}
        }

        if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(DateSpec::At(in_zone(t, tz)));
        }

        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return local_time(naive.date(), naive.hour(), naive.minute(), tz)
                    .map(|t| t + chrono::Duration::seconds(i64::from(naive.second())))
                    .map(DateSpec::At)
                    .ok_or_else(|| invalid_date(trimmed));
            }
        }

        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|d| local_midnight(d, tz))
            .map(DateSpec::At)
            .ok_or_else(|| invalid_date(trimmed))
    }
}

impl From<Timestamp> for DateSpec {
    fn from(t: Timestamp) -> Self {
        DateSpec::At(t)
    }
}

fn invalid_date(input: &str) -> RangeError {
    RangeError::InvalidArguments(format!("cannot parse date '{input}'"))
}

/// Date arguments of one provider call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRequest {
    /// Single reference date
    pub date: Option<DateSpec>,
    /// Range start
    pub start: Option<DateSpec>,
    /// Range end (exclusive)
    pub end: Option<DateSpec>,
}

/// What a request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRequest {
    /// Fetch the provider's latest data
    Latest,
    /// Fetch one instant
    Single(Timestamp),
    /// Fetch `[start, end)`
    Range {
        /// Inclusive start
        start: Timestamp,
        /// Exclusive end
        end: Timestamp,
    },
}

impl DateRequest {
    /// Request for a single date
    pub fn date(date: impl Into<DateSpec>) -> Self {
        Self {
            date: Some(date.into()),
            ..Self::default()
        }
    }

    /// Request for `[start, end)`
    pub fn range(start: impl Into<DateSpec>, end: impl Into<DateSpec>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            ..Self::default()
        }
    }

    /// Request for the provider's latest data
    pub fn latest() -> Self {
        Self::date(DateSpec::Latest)
    }

    /// Set the end
    pub fn with_end(mut self, end: impl Into<DateSpec>) -> Self {
        self.end = Some(end.into());
        self
    }

    /// Resolve sentinels against `now` on the calendar of `tz`.
    ///
    /// - exactly one of `date` and `start` must be given
    /// - `today` with an hourly or five-minute step expands to one full day
    /// - an `end` of `today` means tomorrow's local midnight
    /// - no `end` means a single instant
    pub fn resolve(
        &self,
        step: &WindowStep,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> RangeResult<ResolvedRequest> {
        let date = match (self.date, self.start) {
            (Some(_), Some(_)) => {
                return Err(RangeError::InvalidArguments(
                    "cannot supply both 'date' and 'start'".to_string(),
                ))
            }
            (None, None) => {
                return Err(RangeError::InvalidArguments(
                    "must supply either 'date' or 'start'".to_string(),
                ))
            }
            (Some(d), None) | (None, Some(d)) => d,
        };

        let unresolved = || RangeError::InvalidArguments("cannot resolve 'today'".to_string());
        let local_date = now.with_timezone(&tz).date_naive();
        let today = local_midnight(local_date, tz).ok_or_else(unresolved)?;
        let tomorrow = local_date
            .succ_opt()
            .and_then(|d| local_midnight(d, tz))
            .ok_or_else(unresolved)?;

        let (start, end) = match date {
            DateSpec::Latest => return Ok(ResolvedRequest::Latest),
            DateSpec::Today if step.is_sub_daily() && self.end.is_none() => {
                (today, Some(DateSpec::At(tomorrow)))
            }
            DateSpec::Today => (today, self.end),
            DateSpec::At(t) => (in_zone(t, tz), self.end),
        };

        let end = match end {
            None => return Ok(ResolvedRequest::Single(start)),
            Some(DateSpec::Latest) => {
                return Err(RangeError::InvalidArguments(
                    "'latest' is not a valid end".to_string(),
                ))
            }
            Some(DateSpec::Today) => tomorrow,
            Some(DateSpec::At(t)) => in_zone(t, tz),
        };

        if end < start {
            return Err(RangeError::InvalidRange { start, end });
        }

        Ok(ResolvedRequest::Range { start, end })
    }
}

//! Range-query orchestration.
//!
//! A range request is split into bounded windows ([`splitter`]), reshaped by
//! provider calendar rules ([`rules`]), fetched window by window with retry
//! ([`orchestrator`]) and concatenated in order. [`method`] wraps all of it
//! behind the `date` / `start` / `end` surface providers expose.

use crate::fetcher::FetchError;
use crate::SchemaMismatch;
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, TimeZone};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod method;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod rules;
pub mod splitter;

pub use method::RangeMethod;
pub use orchestrator::{OrchestratorState, RangeOrchestrator, RangeSpec};
pub use progress::{BarProgress, LogProgress, NoProgress, ProgressSink};
pub use request::{DateRequest, DateSpec, ResolvedRequest};
pub use rules::{
    rule_fn, validate_boundaries, ArchiveCutoverRule, BoundaryRule, ChainedRules,
    YearBoundaryRule,
};
pub use splitter::{split_days, WindowSplitter, WindowStep};

/// Instant carrying the UTC offset it was observed at.
///
/// Ordering and equality are by absolute instant. Calendar arithmetic never
/// uses the carried offset; it goes through the provider's [`Tz`] in
/// [`QueryContext`].
pub type Timestamp = DateTime<FixedOffset>;

/// Element of a boundary sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBoundary {
    /// Window edge
    At(Timestamp),
    /// No window may span this point
    Gap,
}

impl DateBoundary {
    /// Instant of an `At` boundary
    pub fn instant(&self) -> Option<Timestamp> {
        match self {
            DateBoundary::At(t) => Some(*t),
            DateBoundary::Gap => None,
        }
    }

    /// Whether this is a `Gap`
    pub fn is_gap(&self) -> bool {
        matches!(self, DateBoundary::Gap)
    }
}

impl From<Timestamp> for DateBoundary {
    fn from(t: Timestamp) -> Self {
        DateBoundary::At(t)
    }
}

/// Half-open fetch window `[start, end)`; `start == end` is a single instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Inclusive start
    pub start: Timestamp,
    /// Exclusive end
    pub end: Timestamp,
}

impl Window {
    /// Window from `start` to `end`
    pub fn new(start: Timestamp, end: Timestamp) -> RangeResult<Self> {
        if end < start {
            return Err(RangeError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Zero-length window at `at`
    pub fn instant(at: Timestamp) -> Self {
        Self { start: at, end: at }
    }

    /// Whether the window has zero length
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// Length of the window
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Whether `t` lies strictly inside the window
    pub fn spans(&self, t: Timestamp) -> bool {
        self.start < t && t < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Provider parameters passed through to rules and fetchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    params: BTreeMap<String, String>,
    timezone: Tz,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
            timezone: Tz::UTC,
        }
    }
}

impl QueryContext {
    /// Empty context on the UTC calendar
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider's time zone, e.g. `chrono_tz::US::Eastern`
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parameter value by key
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All parameters
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Provider time zone
    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

/// Range-query errors
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    /// End precedes start
    #[error("invalid range: end {end} precedes start {start}")]
    InvalidRange {
        /// Requested start
        start: Timestamp,
        /// Requested end
        end: Timestamp,
    },

    /// Malformed or conflicting arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Boundary sequence violates ordering or gap placement
    #[error("boundary ordering violated: {0}")]
    BoundaryOrdering(String),

    /// A window failed after every retry
    #[error("window {window} failed after {attempts} attempts: {source}")]
    FetchExhausted {
        /// Failing window
        window: Window,
        /// Attempts made
        attempts: u32,
        /// Last error
        #[source]
        source: FetchError,
    },

    /// A window failed with a non-retryable error
    #[error("window {window} failed: {source}")]
    Fetch {
        /// Failing window
        window: Window,
        /// Error returned by the fetcher
        #[source]
        source: FetchError,
    },

    /// Windows disagree on their columns
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),

    /// Nothing to fetch or the provider returned nothing
    #[error("no data found: {0}")]
    NoDataFound(String),

    /// Cancelled before completion
    #[error("range query cancelled")]
    Cancelled,

    /// The whole run exceeded its deadline
    #[error("range query exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl RangeError {
    /// Attach window context to a fetch failure
    pub fn from_window_error(window: Window, err: FetchError) -> Self {
        match err {
            FetchError::Exhausted { attempts, source } => RangeError::FetchExhausted {
                window,
                attempts,
                source: *source,
            },
            FetchError::NoData(message) => {
                RangeError::NoDataFound(format!("{window}: {message}"))
            }
            FetchError::Schema(mismatch) => RangeError::SchemaMismatch(mismatch),
            FetchError::Cancelled => RangeError::Cancelled,
            other => RangeError::Fetch {
                window,
                source: other,
            },
        }
    }
}

/// Result type for range operations
pub type RangeResult<T> = Result<T, RangeError>;

/// Turn a validated boundary sequence into windows.
///
/// Consecutive `At` pairs become windows; a `Gap` restarts at the next
/// boundary. Zero-length windows are dropped unless the sequence describes
/// exactly one window.
pub fn windows_between(boundaries: &[DateBoundary]) -> Vec<Window> {
    let windows: Vec<Window> = boundaries
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (DateBoundary::At(start), DateBoundary::At(end)) => Some(Window { start, end }),
            _ => None,
        })
        .collect();

    if windows.len() <= 1 {
        return windows;
    }

    windows.into_iter().filter(|w| !w.is_instant()).collect()
}

/// Local midnight of `date` in `tz`
pub(crate) fn local_midnight(date: NaiveDate, tz: Tz) -> Option<Timestamp> {
    local_time(date, 0, 0, tz)
}

/// `date` at `hour:minute` wall-clock time in `tz`.
///
/// A repeated wall time resolves to its first occurrence; a skipped one to
/// the instant one hour later.
pub(crate) fn local_time(date: NaiveDate, hour: u32, minute: u32, tz: Tz) -> Option<Timestamp> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()?,
    };
    Some(local.fixed_offset())
}

/// `t` re-expressed with the offset `tz` uses at that instant
pub(crate) fn in_zone(t: Timestamp, tz: Tz) -> Timestamp {
    t.with_timezone(&tz).fixed_offset()
}

//! # Grid Data Fetcher Library
//!
//! Range-query orchestration for grid operator data APIs. Most upstream
//! endpoints only serve a bounded date window per request, and many of them
//! add calendar rules on top (no request may cross a year boundary, requests
//! must split where an archive API hands over to the live one). This crate
//! turns a provider's single-window fetch into a retry-safe range fetcher.
//!
//! ## Features
//!
//! - **Window splitting**: day-count, fixed-span and calendar-aligned steps
//! - **Boundary rules**: pluggable strategies that force split points and gaps
//! - **Retrying fetch**: bounded exponential backoff with injectable sleeping
//! - **Concurrent pagination**: bounded worker pool, deterministic page order
//! - **Cancellation**: cooperative stop between windows and pages
//!
//! ## Quick Start
//!
//! ```no_run
//! use grid_data_fetcher::fetcher::window_fn;
//! use grid_data_fetcher::range::{
//!     DateRequest, DateSpec, QueryContext, RangeMethod, WindowStep, YearBoundaryRule,
//! };
//! use grid_data_fetcher::Table;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = window_fn(|window| async move {
//!     // one upstream request for `window` goes here
//!     let _ = window;
//!     Ok(Table::new(["Time", "LMP"]))
//! });
//!
//! let method = RangeMethod::new(fetcher, WindowStep::Days(365)).with_rule(YearBoundaryRule);
//! let context = QueryContext::new()
//!     .with_timezone(chrono_tz::US::Central)
//!     .with_param("market", "DAY_AHEAD_HOURLY");
//! let request = DateRequest::range(
//!     DateSpec::parse("2023-12-28", context.timezone())?,
//!     DateSpec::parse("2024-01-03", context.timezone())?,
//! );
//! let table = method.fetch(&request, &context).await?;
//! println!("{} rows", table.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`range`] - boundaries, windows, splitting, rules, orchestration, the provider method surface
//! - [`fetcher`] - fetch contracts, retrying fetch, concurrent pagination, HTTP transport
//! - [`cancel`] - cooperative cancellation handle
//! - [`config`] - default constants and serde-backed configuration
//! - [`metrics`] - counters for windows, pages and retries
//! - [`logging`] - tracing subscriber setup

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Cooperative cancellation shared across windows and pages
pub mod cancel;

/// Default constants and configuration structures
pub mod config;

/// Fetch contracts, retry and pagination primitives
pub mod fetcher;

/// Tracing subscriber initialization
pub mod logging;

/// Observability counters
pub mod metrics;

/// Range-query orchestration
pub mod range;

pub use cancel::Cancellation;
pub use fetcher::{FetchError, FetchResult};
pub use range::{RangeError, RangeResult, Timestamp};

/// One table row. Cells line up with [`Table::columns`].
pub type Row = Vec<Value>;

/// Named tables returned together by one fetch, merged key by key
pub type Datasets = BTreeMap<String, Table>;

/// Ordered tabular result of one fetch.
///
/// Column names are kept in order; every row carries exactly one cell per
/// column. Cells are plain JSON values so the orchestration layer stays
/// independent of provider schemas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Unchecked serialized form of [`Table`]
#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Row>,
}

impl TryFrom<RawTable> for Table {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Table::with_rows(raw.columns, raw.rows)
    }
}

/// Errors building a [`Table`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A row's cell count differs from the column count
    #[error("row {row} has {found} cells but table has {expected} columns")]
    RowWidth {
        /// Zero-based row position
        row: usize,
        /// Column count
        expected: usize,
        /// Cells in the row
        found: usize,
    },
}

/// Column sets differ between two parts of one concatenation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "schema mismatch in part {index}{}: expected columns {expected:?}, found {found:?}",
    dataset_label(.dataset)
)]
pub struct SchemaMismatch {
    /// Position of the offending part in the concatenation order
    pub index: usize,
    /// Dataset key, for keyed concatenation
    pub dataset: Option<String>,
    /// Columns established by the first part
    pub expected: Vec<String>,
    /// Columns of the offending part
    pub found: Vec<String>,
}

fn dataset_label(dataset: &Option<String>) -> String {
    dataset
        .as_deref()
        .map(|d| format!(" of dataset '{d}'"))
        .unwrap_or_default()
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a table from columns and rows, checking every row's width
    pub fn with_rows<I, S>(columns: I, rows: Vec<Row>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from JSON records.
    ///
    /// Columns are the union of record keys in first-seen order; a key missing
    /// from a record becomes `null` in that row.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume the table, returning its rows
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Append a row
    pub fn push_row(&mut self, row: Row) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Whether both tables carry the same columns, counting repeats (order ignored)
    pub fn has_same_columns(&self, other: &Table) -> bool {
        self.alignment(other).is_some()
    }

    /// For each of our columns, the position of the matching column in `other`.
    ///
    /// Repeated names pair up in order, so `["A", "A"]` never matches `["A", "B"]`.
    fn alignment(&self, other: &Table) -> Option<Vec<usize>> {
        if self.columns.len() != other.columns.len() {
            return None;
        }

        let mut taken = vec![false; other.columns.len()];
        self.columns
            .iter()
            .map(|name| {
                let position =
                    (0..other.columns.len()).find(|&i| !taken[i] && other.columns[i] == *name)?;
                taken[position] = true;
                Some(position)
            })
            .collect()
    }

    /// Concatenate tables in order.
    ///
    /// The first table fixes the column order. A later table whose columns are
    /// a permutation of it is realigned; any other difference fails.
    pub fn concat<I>(tables: I) -> Result<Table, SchemaMismatch>
    where
        I: IntoIterator<Item = Table>,
    {
        let mut tables = tables.into_iter().enumerate();
        let mut merged = match tables.next() {
            Some((_, first)) => first,
            None => return Ok(Table::default()),
        };

        for (index, table) in tables {
            if table.columns == merged.columns {
                merged.rows.extend(table.rows);
                continue;
            }

            let Some(positions) = merged.alignment(&table) else {
                return Err(SchemaMismatch {
                    index,
                    dataset: None,
                    expected: merged.columns.clone(),
                    found: table.columns,
                });
            };
            merged.rows.extend(
                table
                    .rows
                    .into_iter()
                    .map(|row| positions.iter().map(|&i| row[i].clone()).collect::<Row>()),
            );
        }

        Ok(merged)
    }

    /// Concatenate keyed parts dataset by dataset.
    ///
    /// The first part fixes the dataset keys; every later part must carry
    /// the same keys. Each dataset is merged with [`Table::concat`].
    pub fn concat_keyed<I>(parts: I) -> Result<Datasets, SchemaMismatch>
    where
        I: IntoIterator<Item = Datasets>,
    {
        let mut parts = parts.into_iter().enumerate();
        let Some((_, first)) = parts.next() else {
            return Ok(Datasets::new());
        };

        let mut pending: BTreeMap<String, Vec<Table>> =
            first.into_iter().map(|(key, table)| (key, vec![table])).collect();

        for (index, mut part) in parts {
            for (key, tables) in pending.iter_mut() {
                match part.remove(key) {
                    Some(table) => tables.push(table),
                    None => {
                        return Err(SchemaMismatch {
                            index,
                            dataset: Some(key.clone()),
                            expected: tables[0].columns.clone(),
                            found: Vec::new(),
                        })
                    }
                }
            }

            if let Some((key, extra)) = part.into_iter().next() {
                return Err(SchemaMismatch {
                    index,
                    dataset: Some(key),
                    expected: Vec::new(),
                    found: extra.columns,
                });
            }
        }

        pending
            .into_iter()
            .map(|(key, tables)| -> Result<(String, Table), SchemaMismatch> {
                let merged = Table::concat(tables).map_err(|mut e| {
                    e.dataset = Some(key.clone());
                    e
                })?;
                Ok((key, merged))
            })
            .collect()
    }
}

//! Fetch contracts and resilient-fetch primitives

use crate::range::{QueryContext, Window};
use crate::{Datasets, SchemaMismatch, Table};
use async_trait::async_trait;
use std::future::Future;

pub mod http;
pub mod paged_endpoint;
pub mod pagination;
pub mod rate_limit;
pub mod retry;
pub mod retry_formatter;

pub use pagination::{ConcurrentPaginator, PaginatedWindowFetcher, PaginationState};
pub use retry::{NoopSleeper, RecordingSleeper, RetryPolicy, RetryingFetch, Sleeper, TokioSleeper};

/// Errors of a single fetch operation
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-success HTTP status
    #[error("HTTP error {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimited,

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Request or attempt timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Response could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Provider reported an error in a successful response
    #[error("API error: {0}")]
    Api(String),

    /// Provider returned zero records
    #[error("no data found: {0}")]
    NoData(String),

    /// Operation not offered by this fetcher
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Pages disagree on their columns
    #[error(transparent)]
    Schema(#[from] SchemaMismatch),

    /// Transient failures used up every attempt
    #[error("fetch failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: Box<FetchError>,
    },

    /// Cancelled before completion
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::RateLimited => true,
            FetchError::Http { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Fetches one bounded window from a provider.
///
/// Implementations issue exactly one logical request per call; splitting,
/// retrying and concatenation happen around them.
#[async_trait]
pub trait WindowFetcher: Send + Sync {
    /// Fetch all records in `window`
    async fn fetch_window(&self, window: Window, context: &QueryContext) -> FetchResult<Table>;

    /// Fetch the provider's most recent data
    async fn fetch_latest(&self, _context: &QueryContext) -> FetchResult<Table> {
        Err(FetchError::Unsupported("latest data".to_string()))
    }
}

/// Fetches one bounded window that yields several named tables.
///
/// Used by datasets published as a bundle per request (e.g. prices and
/// constraints from one report); the orchestrator merges each key across
/// windows.
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Fetch every dataset in `window`
    async fn fetch_datasets(&self, window: Window, context: &QueryContext)
        -> FetchResult<Datasets>;
}

/// Offset-addressed request for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page index
    pub index: u64,
    /// Offset of the first record
    pub offset: u64,
    /// Records requested
    pub limit: u64,
}

impl PageRequest {
    /// Request for page `index` of `page_size` records
    pub fn new(index: u64, page_size: u64) -> Self {
        Self {
            index,
            offset: index.saturating_mul(page_size),
            limit: page_size,
        }
    }
}

/// One page of records
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records of this page
    pub table: Table,
    /// Total records across all pages, when the provider reports it
    pub total_records: Option<u64>,
}

impl Page {
    /// Page carrying the provider's total record count
    pub fn new(table: Table, total_records: u64) -> Self {
        Self {
            table,
            total_records: Some(total_records),
        }
    }

    /// Page without a total; treated as the only page
    pub fn single(table: Table) -> Self {
        Self {
            table,
            total_records: None,
        }
    }
}

/// Fetches one page of a paginated endpoint
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page described by `request`
    async fn fetch_page(&self, request: PageRequest) -> FetchResult<Page>;
}

/// [`WindowFetcher`] backed by a closure
pub struct WindowFn<F>(F);

/// Wrap an async closure as a [`WindowFetcher`]
pub fn window_fn<F, Fut>(f: F) -> WindowFn<F>
where
    F: Fn(Window) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Table>> + Send + 'static,
{
    WindowFn(f)
}

#[async_trait]
impl<F, Fut> WindowFetcher for WindowFn<F>
where
    F: Fn(Window) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Table>> + Send + 'static,
{
    async fn fetch_window(&self, window: Window, _context: &QueryContext) -> FetchResult<Table> {
        (self.0)(window).await
    }
}

/// [`DatasetFetcher`] backed by a closure
pub struct DatasetsFn<F>(F);

/// Wrap an async closure as a [`DatasetFetcher`]
pub fn datasets_fn<F, Fut>(f: F) -> DatasetsFn<F>
where
    F: Fn(Window) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Datasets>> + Send + 'static,
{
    DatasetsFn(f)
}

#[async_trait]
impl<F, Fut> DatasetFetcher for DatasetsFn<F>
where
    F: Fn(Window) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Datasets>> + Send + 'static,
{
    async fn fetch_datasets(
        &self,
        window: Window,
        _context: &QueryContext,
    ) -> FetchResult<Datasets> {
        (self.0)(window).await
    }
}

/// [`PageFetcher`] backed by a closure
pub struct PageFn<F>(F);

/// Wrap an async closure as a [`PageFetcher`]
pub fn page_fn<F, Fut>(f: F) -> PageFn<F>
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Page>> + Send + 'static,
{
    PageFn(f)
}

#[async_trait]
impl<F, Fut> PageFetcher for PageFn<F>
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Page>> + Send + 'static,
{
    async fn fetch_page(&self, request: PageRequest) -> FetchResult<Page> {
        (self.0)(request).await
    }
}

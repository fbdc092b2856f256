//! Concurrent fetch-and-merge for offset-paginated endpoints.
//!
//! Page 0 is fetched first to learn the total record count; the remaining
//! pages run on a bounded pool and are merged back in page-index order.
//!
//! Includes safety mechanisms:
//! - A cap on scheduled pages so a corrupt total cannot fan out unbounded
//! - Per-page retry through [`RetryingFetch`]
//! - Cancellation checked before each page starts

use crate::cancel::Cancellation;
use crate::config::{FetchConfig, DEFAULT_PAGE_SIZE, DEFAULT_PAGE_WORKERS, MAX_PAGES};
use crate::fetcher::{
    FetchError, FetchResult, Page, PageFetcher, PageRequest, RetryPolicy, RetryingFetch,
    WindowFetcher,
};
use crate::range::progress::ProgressSink;
use crate::range::{QueryContext, Window};
use crate::Table;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Bookkeeping for one pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    /// Records requested per page
    pub page_size: u64,
    /// Total records reported by page 0
    pub total_records: u64,
    /// Pages fetched so far, including page 0
    pub pages_fetched: u64,
}

impl PaginationState {
    /// `ceil(total_records / page_size)`
    pub fn total_pages(&self) -> u64 {
        self.total_records.div_ceil(self.page_size.max(1))
    }
}

/// Fetches every page of an endpoint with bounded concurrency
#[derive(Clone)]
pub struct ConcurrentPaginator {
    page_size: u64,
    workers: usize,
    retry: RetryingFetch,
    progress: Option<Arc<dyn ProgressSink>>,
    cancellation: Option<Cancellation>,
}

impl Default for ConcurrentPaginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ConcurrentPaginator {
    /// Paginator requesting `page_size` records per page
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            workers: DEFAULT_PAGE_WORKERS,
            retry: RetryingFetch::new(RetryPolicy::default()).with_label("page"),
            progress: None,
            cancellation: None,
        }
    }

    /// Paginator with page size, workers and per-page retry from `config`
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.pagination.page_size)
            .with_workers(config.pagination.workers)
            .with_retry(RetryingFetch::new(config.retry.policy()).with_label("page"))
    }

    /// Run at most `workers` page requests at once
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Retry each page with `retry`
    pub fn with_retry(mut self, retry: RetryingFetch) -> Self {
        self.retry = retry;
        self
    }

    /// Report `(pages_fetched, total_pages)` to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop scheduling pages once `cancellation` fires
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.retry = self.retry.with_cancellation(cancellation.clone());
        self.cancellation = Some(cancellation);
        self
    }

    /// Records per page
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Concurrent page requests
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch and merge every page
    pub async fn fetch_all<P>(&self, fetcher: &P) -> FetchResult<Table>
    where
        P: PageFetcher + ?Sized,
    {
        self.fetch_all_with_state(fetcher)
            .await
            .map(|(table, _)| table)
    }

    /// Fetch and merge every page, also returning the pagination state
    pub async fn fetch_all_with_state<P>(&self, fetcher: &P) -> FetchResult<(Table, PaginationState)>
    where
        P: PageFetcher + ?Sized,
    {
        self.check_cancelled()?;

        let first_request = PageRequest::new(0, self.page_size);
        let first = self.retry.call(|| fetcher.fetch_page(first_request)).await?;
        crate::metrics::record_page_fetched();

        let Some(total_records) = first.total_records else {
            debug!(rows = first.table.len(), "No total reported, treating page 0 as the only page");
            let state = PaginationState {
                page_size: self.page_size,
                total_records: first.table.len() as u64,
                pages_fetched: 1,
            };
            return Ok((first.table, state));
        };

        let mut state = PaginationState {
            page_size: self.page_size,
            total_records,
            pages_fetched: 1,
        };
        let total_pages = state.total_pages();

        if total_pages > MAX_PAGES {
            return Err(FetchError::Api(format!(
                "total of {} records implies {total_pages} pages, above the limit of {MAX_PAGES}",
                state.total_records
            )));
        }

        if total_pages <= 1 {
            return Ok((first.table, state));
        }

        debug!(
            total_records = state.total_records,
            total_pages = total_pages,
            workers = self.workers,
            "Fetching remaining pages concurrently"
        );
        self.report(state.pages_fetched, total_pages);

        let mut slots: Vec<Option<Table>> = (1..total_pages).map(|_| None).collect();
        {
            let mut pending = stream::iter(1..total_pages)
                .map(|index| async move {
                    self.check_cancelled()?;
                    let request = PageRequest::new(index, self.page_size);
                    let page = self.retry.call(|| fetcher.fetch_page(request)).await?;
                    Ok::<_, FetchError>((index, page.table))
                })
                .buffer_unordered(self.workers);

            while let Some(result) = pending.next().await {
                let (index, table) = result?;
                crate::metrics::record_page_fetched();
                state.pages_fetched += 1;
                if let Some(slot) = slots.get_mut((index - 1) as usize) {
                    *slot = Some(table);
                }
                self.report(state.pages_fetched, total_pages);
            }
        }

        let mut tables = Vec::with_capacity(total_pages as usize);
        tables.push(first.table);
        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(table) => tables.push(table),
                None => {
                    return Err(FetchError::Api(format!(
                        "page {} missing after merge",
                        position + 1
                    )))
                }
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_finish();
        }

        Ok((Table::concat(tables)?, state))
    }

    fn check_cancelled(&self) -> FetchResult<()> {
        match &self.cancellation {
            Some(c) if c.is_cancelled() => Err(FetchError::Cancelled),
            _ => Ok(()),
        }
    }

    fn report(&self, completed: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress.on_progress(completed as usize, total as usize);
        }
    }
}

/// [`WindowFetcher`] whose every window is a paginated request.
///
/// `fetch` receives the window and one page request; the paginator handles
/// totals, concurrency and ordering.
pub struct PaginatedWindowFetcher<F> {
    paginator: ConcurrentPaginator,
    fetch: F,
}

impl<F, Fut> PaginatedWindowFetcher<F>
where
    F: Fn(Window, PageRequest) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult<Page>> + Send + 'static,
{
    /// Paginate each window with `paginator`
    pub fn new(paginator: ConcurrentPaginator, fetch: F) -> Self {
        Self { paginator, fetch }
    }
}

struct WindowPages<'a, F> {
    fetch: &'a F,
    window: Window,
}

#[async_trait]
impl<'a, F, Fut> PageFetcher for WindowPages<'a, F>
where
    F: Fn(Window, PageRequest) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult<Page>> + Send + 'static,
{
    async fn fetch_page(&self, request: PageRequest) -> FetchResult<Page> {
        (self.fetch)(self.window, request).await
    }
}

#[async_trait]
impl<F, Fut> WindowFetcher for PaginatedWindowFetcher<F>
where
    F: Fn(Window, PageRequest) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult<Page>> + Send + 'static,
{
    async fn fetch_window(&self, window: Window, _context: &QueryContext) -> FetchResult<Table> {
        let pages = WindowPages {
            fetch: &self.fetch,
            window,
        };
        self.paginator.fetch_all(&pages).await
    }
}

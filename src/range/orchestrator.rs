//! Multi-window range orchestration.
//!
//! The orchestrator splits a range, lets a provider rule reshape the
//! boundaries, fetches each window in chronological order through a
//! [`RetryingFetch`] and concatenates the results, either as one table or
//! dataset by dataset. Windows are fetched sequentially; a single failure
//! aborts the run and discards the rest.

use crate::cancel::Cancellation;
use crate::config::FetchConfig;
use crate::fetcher::{DatasetFetcher, FetchResult, RetryPolicy, RetryingFetch, WindowFetcher};
use crate::range::progress::{NoProgress, ProgressSink};
use crate::range::rules::{validate_boundaries, BoundaryRule};
use crate::range::splitter::{WindowSplitter, WindowStep};
use crate::range::{
    windows_between, DateBoundary, QueryContext, RangeError, RangeResult, Timestamp, Window,
};
use crate::{Datasets, Table};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Lifecycle of the most recent run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No run started yet
    Idle,
    /// Computing boundaries
    Splitting,
    /// Fetching window `index` of `total`
    FetchingWindow {
        /// Zero-based window index
        index: usize,
        /// Windows in this run
        total: usize,
    },
    /// Merging window tables
    Concatenating,
    /// Run completed
    Done,
    /// Run failed
    Failed,
}

/// Range to fetch and how to step through it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    /// Inclusive start
    pub start: Timestamp,
    /// Exclusive end
    pub end: Timestamp,
    /// Window step
    pub step: WindowStep,
}

impl RangeSpec {
    /// Range from `start` to `end` stepped by `step`
    pub fn new(start: Timestamp, end: Timestamp, step: WindowStep) -> Self {
        Self { start, end, step }
    }

    /// Range split into windows of at most `max_window_days` days
    pub fn days(start: Timestamp, end: Timestamp, max_window_days: u32) -> Self {
        Self::new(start, end, WindowStep::Days(max_window_days))
    }
}

/// Drives splitting, rules, per-window retry and concatenation
pub struct RangeOrchestrator {
    retry: RetryingFetch,
    progress: Arc<dyn ProgressSink>,
    cancellation: Option<Cancellation>,
    deadline: Option<Duration>,
    state: Mutex<OrchestratorState>,
}

impl Default for RangeOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeOrchestrator {
    /// Orchestrator with the default retry policy and no progress reporting
    pub fn new() -> Self {
        Self {
            retry: RetryingFetch::new(RetryPolicy::default()).with_label("window"),
            progress: Arc::new(NoProgress),
            cancellation: None,
            deadline: None,
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    /// Orchestrator using the retry policy and run deadline from `config`
    pub fn from_config(config: &FetchConfig) -> Self {
        let orchestrator = Self::new()
            .with_retry(RetryingFetch::new(config.retry.policy()).with_label("window"));
        match config.run_timeout() {
            Some(deadline) => orchestrator.with_deadline(deadline),
            None => orchestrator,
        }
    }

    /// Retry windows with `retry`
    pub fn with_retry(mut self, retry: RetryingFetch) -> Self {
        self.retry = match &self.cancellation {
            Some(c) => retry.with_cancellation(c.clone()),
            None => retry,
        };
        self
    }

    /// Report per-window progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop before the next window once `cancellation` fires
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.retry = self.retry.with_cancellation(cancellation.clone());
        self.cancellation = Some(cancellation);
        self
    }

    /// Bound the whole run by `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Retrier used for each window
    pub fn retry(&self) -> &RetryingFetch {
        &self.retry
    }

    /// State of the most recent run
    pub fn state(&self) -> OrchestratorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(OrchestratorState::Failed)
    }

    /// Validated boundary sequence for `spec` after applying `rule`
    pub fn plan(
        &self,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
    ) -> RangeResult<Vec<DateBoundary>> {
        let boundaries = WindowSplitter::new(spec.step)
            .with_timezone(context.timezone())
            .split(spec.start, spec.end)?;
        let boundaries = match rule {
            Some(rule) => rule.apply(boundaries, context)?,
            None => boundaries,
        };
        validate_boundaries(&boundaries)?;
        Ok(boundaries)
    }

    /// Windows that a run over `spec` would fetch, in order
    pub fn windows(
        &self,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
    ) -> RangeResult<Vec<Window>> {
        Ok(windows_between(&self.plan(spec, rule, context)?))
    }

    /// Fetch every window and concatenate the results in window order
    pub async fn run<F>(
        &self,
        fetcher: &F,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
    ) -> RangeResult<Table>
    where
        F: WindowFetcher + ?Sized,
    {
        let span = info_span!("range_run", start = %spec.start, end = %spec.end, step = %spec.step);
        async move {
            let started = Instant::now();
            let result = self
                .bounded(spec, rule, context, |w| fetcher.fetch_window(w, context), Table::len)
                .await
                .and_then(|tables| {
                    self.set_state(OrchestratorState::Concatenating);
                    Table::concat(tables).map_err(RangeError::from)
                });
            self.finish(&result, started, Table::len);
            result
        }
        .instrument(span)
        .await
    }

    /// Fetch every window, returning the per-window tables unmerged
    pub async fn run_raw<F>(
        &self,
        fetcher: &F,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
    ) -> RangeResult<Vec<Table>>
    where
        F: WindowFetcher + ?Sized,
    {
        let span = info_span!("range_run_raw", start = %spec.start, end = %spec.end, step = %spec.step);
        async move {
            let started = Instant::now();
            let result = self
                .bounded(spec, rule, context, |w| fetcher.fetch_window(w, context), Table::len)
                .await;
            self.finish(&result, started, |tables| tables.iter().map(Table::len).sum());
            result
        }
        .instrument(span)
        .await
    }

    /// Fetch every window of a multi-table dataset and merge each key in
    /// window order
    pub async fn run_keyed<F>(
        &self,
        fetcher: &F,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
    ) -> RangeResult<Datasets>
    where
        F: DatasetFetcher + ?Sized,
    {
        let span = info_span!("range_run_keyed", start = %spec.start, end = %spec.end, step = %spec.step);
        async move {
            let started = Instant::now();
            let result = self
                .bounded(
                    spec,
                    rule,
                    context,
                    |w| fetcher.fetch_datasets(w, context),
                    dataset_rows,
                )
                .await
                .and_then(|parts| {
                    self.set_state(OrchestratorState::Concatenating);
                    Table::concat_keyed(parts).map_err(RangeError::from)
                });
            self.finish(&result, started, dataset_rows);
            result
        }
        .instrument(span)
        .await
    }

    async fn bounded<T, G, Fut>(
        &self,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
        fetch: G,
        rows: fn(&T) -> usize,
    ) -> RangeResult<Vec<T>>
    where
        G: Fn(Window) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let fetch = self.fetch_windows(spec, rule, context, fetch, rows);
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .unwrap_or(Err(RangeError::DeadlineExceeded(limit))),
            None => fetch.await,
        }
    }

    async fn fetch_windows<T, G, Fut>(
        &self,
        spec: RangeSpec,
        rule: Option<&dyn BoundaryRule>,
        context: &QueryContext,
        fetch: G,
        rows: fn(&T) -> usize,
    ) -> RangeResult<Vec<T>>
    where
        G: Fn(Window) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        self.set_state(OrchestratorState::Splitting);
        let windows = self.windows(spec, rule, context)?;
        if windows.is_empty() {
            return Err(RangeError::NoDataFound(
                "boundary plan contains no windows".to_string(),
            ));
        }

        let total = windows.len();
        info!(windows = total, "Fetching range");

        let mut parts = Vec::with_capacity(total);
        for (index, window) in windows.into_iter().enumerate() {
            if self
                .cancellation
                .as_ref()
                .is_some_and(Cancellation::is_cancelled)
            {
                info!(completed = index, total, "Range query cancelled");
                return Err(RangeError::Cancelled);
            }

            self.set_state(OrchestratorState::FetchingWindow { index, total });
            debug!(window = %window, index, total, "Fetching window");

            let part = self
                .retry
                .for_window(window)
                .call(|| fetch(window))
                .await
                .map_err(|e| RangeError::from_window_error(window, e))?;

            crate::metrics::record_window_fetched(rows(&part));
            parts.push(part);

            if total > 1 {
                self.progress.on_progress(index + 1, total);
            }
        }

        if total > 1 {
            self.progress.on_finish();
        }

        Ok(parts)
    }

    fn finish<T>(&self, result: &RangeResult<T>, started: Instant, rows: impl Fn(&T) -> usize) {
        let elapsed = started.elapsed();
        match result {
            Ok(value) => {
                self.set_state(OrchestratorState::Done);
                crate::metrics::record_run(true, elapsed);
                info!(
                    rows = rows(value),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Range query completed"
                );
            }
            Err(e) => {
                self.set_state(OrchestratorState::Failed);
                crate::metrics::record_run(false, elapsed);
                warn!(error = %e, "Range query failed");
            }
        }
    }

    fn set_state(&self, state: OrchestratorState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

fn dataset_rows(datasets: &Datasets) -> usize {
    datasets.values().map(Table::len).sum()
}

//! Provider-facing entry point for date and range queries.
//!
//! [`RangeMethod`] binds a [`WindowFetcher`] to its window step and calendar
//! rule, resolves the `date` / `start` / `end` arguments and dispatches to a
//! single fetch or a full orchestrated run.

use crate::fetcher::WindowFetcher;
use crate::range::orchestrator::{RangeOrchestrator, RangeSpec};
use crate::range::request::{DateRequest, ResolvedRequest};
use crate::range::rules::BoundaryRule;
use crate::range::splitter::WindowStep;
use crate::range::{QueryContext, RangeError, RangeResult, Window};
use crate::Table;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

type StepFn = Arc<dyn Fn(&QueryContext) -> WindowStep + Send + Sync>;
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
enum StepSource {
    Fixed(WindowStep),
    PerQuery(StepFn),
}

/// A provider method that accepts a single date or a date range
pub struct RangeMethod<F> {
    fetcher: F,
    step: StepSource,
    rule: Option<Arc<dyn BoundaryRule>>,
    orchestrator: RangeOrchestrator,
    clock: Clock,
}

impl<F: WindowFetcher> RangeMethod<F> {
    /// Method fetching through `fetcher`, splitting ranges by `step`
    pub fn new(fetcher: F, step: WindowStep) -> Self {
        Self {
            fetcher,
            step: StepSource::Fixed(step),
            rule: None,
            orchestrator: RangeOrchestrator::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Choose the window step per query, e.g. from a `market` parameter
    pub fn with_step_fn(
        mut self,
        step: impl Fn(&QueryContext) -> WindowStep + Send + Sync + 'static,
    ) -> Self {
        self.step = StepSource::PerQuery(Arc::new(step));
        self
    }

    /// Reshape boundaries with `rule` before fetching
    pub fn with_rule(mut self, rule: impl BoundaryRule + 'static) -> Self {
        self.rule = Some(Arc::new(rule));
        self
    }

    /// Replace the orchestrator (retry, progress, cancellation, deadline)
    pub fn with_orchestrator(mut self, orchestrator: RangeOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Replace the clock used to resolve `today`
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Orchestrator driving range runs
    pub fn orchestrator(&self) -> &RangeOrchestrator {
        &self.orchestrator
    }

    /// Wrapped fetcher
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Window step for `context`
    pub fn step_for(&self, context: &QueryContext) -> WindowStep {
        match &self.step {
            StepSource::Fixed(step) => *step,
            StepSource::PerQuery(f) => f(context),
        }
    }

    /// Resolve `request` and fetch it.
    ///
    /// `latest` goes to [`WindowFetcher::fetch_latest`], a lone date to one
    /// retried window fetch, and a range through the orchestrator.
    pub async fn fetch(&self, request: &DateRequest, context: &QueryContext) -> RangeResult<Table> {
        let step = self.step_for(context);
        let now = (self.clock)();

        match request.resolve(&step, context.timezone(), now)? {
            ResolvedRequest::Latest => {
                debug!("Fetching latest");
                let local_now = now.with_timezone(&context.timezone()).fixed_offset();
                let marker = Window::instant(local_now);
                self.orchestrator
                    .retry()
                    .call(|| self.fetcher.fetch_latest(context))
                    .await
                    .map_err(|e| RangeError::from_window_error(marker, e))
            }
            ResolvedRequest::Single(at) => {
                let window = Window::instant(at);
                debug!(window = %window, "Fetching single date");
                self.orchestrator
                    .retry()
                    .for_window(window)
                    .call(|| self.fetcher.fetch_window(window, context))
                    .await
                    .map_err(|e| RangeError::from_window_error(window, e))
            }
            ResolvedRequest::Range { start, end } => {
                self.orchestrator
                    .run(
                        &self.fetcher,
                        RangeSpec::new(start, end, step),
                        self.rule.as_deref(),
                        context,
                    )
                    .await
            }
        }
    }
}

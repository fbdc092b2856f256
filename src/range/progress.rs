//! Progress reporting for multi-window runs and paginations.
//!
//! Sinks receive `(completed, total)` after each unit of work. The tracing
//! sink keeps a [`ProgressState`] to estimate the remaining time; the
//! indicatif sink drives a terminal progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Receives progress updates
pub trait ProgressSink: Send + Sync {
    /// `completed` of `total` units are done
    fn on_progress(&self, completed: usize, total: usize);

    /// All units are done
    fn on_finish(&self) {}
}

/// Discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Completion counters with a rate-based time estimate.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Units completed
    pub completed: usize,
    /// Units expected
    pub total: usize,
    /// When tracking started
    pub start_time: Instant,
    /// Unit label, plural ("windows", "pages")
    pub unit: String,
}

impl ProgressState {
    /// Start tracking `total` units
    pub fn new(total: usize, unit: impl Into<String>) -> Self {
        Self {
            completed: 0,
            total,
            start_time: Instant::now(),
            unit: unit.into(),
        }
    }

    /// Completion percentage (0-100)
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Remaining time at the average rate so far
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.completed == 0 || self.completed >= self.total {
            return None;
        }
        let per_unit = self.start_time.elapsed().as_secs_f64() / self.completed as f64;
        let remaining = (self.total - self.completed) as f64 * per_unit;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut message = format!(
            "[PROGRESS] {}/{} {} - {:.1}% complete",
            self.completed,
            self.total,
            self.unit,
            self.percentage()
        );

        if let Some(remaining) = self.estimate_remaining() {
            message.push_str(&format!(" - ~{} remaining", format_duration(remaining)));
        }

        message
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

/// Logs progress through `tracing`
#[derive(Debug)]
pub struct LogProgress {
    unit: String,
    state: Mutex<Option<ProgressState>>,
}

impl LogProgress {
    /// Log progress counted in `unit` (plural)
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            state: Mutex::new(None),
        }
    }
}

impl ProgressSink for LogProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        let stale = guard
            .as_ref()
            .is_some_and(|state| state.total != total || completed <= state.completed);
        if stale {
            *guard = None;
        }
        let state = guard.get_or_insert_with(|| ProgressState::new(total, self.unit.clone()));
        state.completed = completed;
        info!(completed, total, "{}", state.format_progress());
    }

    fn on_finish(&self) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some(state) = guard.take() {
                info!(
                    total = state.total,
                    elapsed_secs = state.start_time.elapsed().as_secs(),
                    "Finished {} {}",
                    state.total,
                    state.unit
                );
            }
        }
    }
}

/// Drives an indicatif progress bar
#[derive(Clone)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Visible bar labelled with `message`
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(message.into());
        Self { bar }
    }

    /// Bar that never draws
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Underlying bar
    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

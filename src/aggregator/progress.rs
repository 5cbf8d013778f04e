//! Progress snapshots and final summaries of an aggregation run.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Completion percentage reported while a run is still going.
const MAX_RUNNING_PERCENT: f64 = 95.0;

/// Why a run stopped requesting pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionReason {
  /// The upstream reported no further pages
  Completed,
  /// The caller asked to stop
  Cancelled,
  /// A page, item or consecutive-failure ceiling was hit
  ErrorLimitReached,
  /// The run deadline passed
  Timeout,
}

impl fmt::Display for CompletionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CompletionReason::Completed => "completed",
      CompletionReason::Cancelled => "cancelled",
      CompletionReason::ErrorLimitReached => "error-limit-reached",
      CompletionReason::Timeout => "timeout",
    };
    f.write_str(name)
  }
}

/// A page that failed for good and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageError {
  pub page: u32,
  pub message: String,
}

/// Live state of a run, handed to progress sinks after every page attempt.
#[derive(Debug, Clone)]
pub struct PaginationProgress {
  /// Page most recently attempted (1-based, 0 before the first request)
  pub current_page: u32,
  /// Estimate, revised from upstream metadata as pages arrive
  pub total_pages: Option<u32>,
  pub items_fetched: usize,
  pub estimated_total_items: Option<u64>,
  pub started_at: Instant,
  /// Elapsed time of each successful page, in order
  pub page_timings: Vec<Duration>,
  pub errors: Vec<PageError>,
  /// Set once the run has stopped
  pub completion_reason: Option<CompletionReason>,
}

impl PaginationProgress {
  pub fn new(started_at: Instant) -> Self {
    Self {
      current_page: 0,
      total_pages: None,
      items_fetched: 0,
      estimated_total_items: None,
      started_at,
      page_timings: Vec::new(),
      errors: Vec::new(),
      completion_reason: None,
    }
  }

  pub fn pages_succeeded(&self) -> usize {
    self.page_timings.len()
  }

  pub fn pages_attempted(&self) -> usize {
    self.page_timings.len() + self.errors.len()
  }

  pub fn is_finished(&self) -> bool {
    self.completion_reason.is_some()
  }

  pub fn elapsed(&self) -> Duration {
    self.started_at.elapsed()
  }

  pub fn average_page_time(&self) -> Option<Duration> {
    let count = u32::try_from(self.page_timings.len()).ok().filter(|&n| n > 0)?;
    let total: Duration = self.page_timings.iter().sum();
    Some(total / count)
  }

  /// Time left at the average page rate, when the page total is known.
  pub fn eta(&self) -> Option<Duration> {
    if self.is_finished() {
      return Some(Duration::ZERO);
    }
    let remaining = self.total_pages?.saturating_sub(self.current_page);
    Some(self.average_page_time()? * remaining)
  }

  /// Share of the estimated pages done, in percent.
  ///
  /// Stays below 100 until the run has finished, since the page estimate can
  /// still grow.
  pub fn completion_percent(&self) -> f64 {
    if self.is_finished() {
      return 100.0;
    }
    match self.total_pages {
      Some(total) if total > 0 => {
        (f64::from(self.current_page) / f64::from(total) * 100.0).min(MAX_RUNNING_PERCENT)
      }
      _ => 0.0,
    }
  }
}

/// How usable the aggregated data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Every page arrived and the run completed normally
  Success,
  /// Some data arrived, but pages were skipped or the run stopped early
  Partial,
  /// Nothing arrived and pages failed
  Failed,
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Outcome::Success => "success",
      Outcome::Partial => "partial",
      Outcome::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// Final totals of a run, handed to the finished callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSummary {
  pub total_items: usize,
  pub pages_succeeded: usize,
  pub pages_attempted: usize,
  pub elapsed: Duration,
  pub errors: Vec<PageError>,
  pub completion_reason: CompletionReason,
  pub outcome: Outcome,
}

impl AggregationSummary {
  pub fn from_progress(progress: &PaginationProgress, reason: CompletionReason) -> Self {
    let pages_succeeded = progress.pages_succeeded();
    let outcome = if pages_succeeded == 0 && !progress.errors.is_empty() {
      Outcome::Failed
    } else if !progress.errors.is_empty() || reason != CompletionReason::Completed {
      Outcome::Partial
    } else {
      Outcome::Success
    };

    Self {
      total_items: progress.items_fetched,
      pages_succeeded,
      pages_attempted: progress.pages_attempted(),
      elapsed: progress.elapsed(),
      errors: progress.errors.clone(),
      completion_reason: reason,
      outcome,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.outcome == Outcome::Success
  }

  /// One-line description for display.
  pub fn describe(&self) -> String {
    let mut text = if self.errors.is_empty() {
      format!(
        "{} of {} pages succeeded; {} items",
        self.pages_succeeded, self.pages_attempted, self.total_items
      )
    } else {
      let failed = self.errors.len();
      format!(
        "{} of {} pages succeeded; {} {} failed and {} skipped",
        self.pages_succeeded,
        self.pages_attempted,
        failed,
        if failed == 1 { "page" } else { "pages" },
        if failed == 1 { "was" } else { "were" },
      )
    };

    if self.completion_reason != CompletionReason::Completed {
      text.push_str(&format!(" (stopped: {})", self.completion_reason));
    }
    text
  }
}

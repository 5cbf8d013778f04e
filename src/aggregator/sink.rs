use super::progress::{AggregationSummary, PaginationProgress};

/// Receives progress of an aggregation run.
///
/// `on_progress` is called after every page attempt, successful or not;
/// `on_finished` exactly once when the run stops.
pub trait ProgressSink: Send + Sync {
  fn on_progress(&self, _progress: &PaginationProgress) {}

  fn on_finished(&self, _summary: &AggregationSummary) {}
}

/// Ignores everything.
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// Adapts a pair of closures into a [`ProgressSink`].
pub struct CallbackSink<P, F> {
  progress: P,
  finished: F,
}

impl<P, F> CallbackSink<P, F>
where
  P: Fn(&PaginationProgress) + Send + Sync,
  F: Fn(&AggregationSummary) + Send + Sync,
{
  pub fn new(progress: P, finished: F) -> Self {
    Self { progress, finished }
  }
}

impl<P, F> ProgressSink for CallbackSink<P, F>
where
  P: Fn(&PaginationProgress) + Send + Sync,
  F: Fn(&AggregationSummary) + Send + Sync,
{
  fn on_progress(&self, progress: &PaginationProgress) {
    (self.progress)(progress)
  }

  fn on_finished(&self, summary: &AggregationSummary) {
    (self.finished)(summary)
  }
}

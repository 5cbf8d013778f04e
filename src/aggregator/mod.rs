//! Paginated aggregation.
//!
//! A [`PaginatedAggregator`] requests pages of an upstream endpoint strictly
//! in order, accumulating their items. Single-page failures degrade the result
//! to partial data instead of failing the run; progress is reported through a
//! [`ProgressSink`] after every page attempt.

mod page;
mod paginator;
mod progress;
mod sink;

pub use page::{parse_page, Page, PageItem};
pub use paginator::{
  AdaptivePageSize, AggregationResult, CancellationFlag, PageRequest, PaginatedAggregator,
  PaginationOptions,
};
pub use progress::{AggregationSummary, CompletionReason, Outcome, PageError, PaginationProgress};
pub use sink::{CallbackSink, NoopSink, ProgressSink};

//! Sequential walk over an upstream paginated endpoint.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use super::page::{parse_page, Page, PageItem};
use super::progress::{AggregationSummary, CompletionReason, PageError, PaginationProgress};
use super::sink::ProgressSink;
use crate::auth::TokenProvider;
use crate::cache::Params;
use crate::request::{FetchError, RequestCoordinator, RequestOptions};

/// Cooperative stop signal for a run.
///
/// Checked between pages; a page request already in flight is allowed to
/// settle.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
  cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

/// Page size tuning from the average time per page.
///
/// A slow run shrinks the page size by a fifth after each page, a fast one
/// grows it by a fifth. The result is kept within `min_page_size` and
/// `max_page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptivePageSize {
  pub min_page_size: u32,
  pub max_page_size: u32,
  /// Average page time above which pages get smaller
  pub slow_average: Duration,
  /// Average page time below which pages get larger
  pub fast_average: Duration,
}

impl Default for AdaptivePageSize {
  fn default() -> Self {
    Self {
      min_page_size: 1000,
      max_page_size: 10_000,
      slow_average: Duration::from_secs(5),
      fast_average: Duration::from_secs(2),
    }
  }
}

impl AdaptivePageSize {
  pub fn next_size(&self, current: u32, average: Duration) -> u32 {
    let next = if average > self.slow_average {
      current.saturating_mul(4) / 5
    } else if average < self.fast_average {
      current.saturating_mul(6) / 5
    } else {
      current
    };
    next.clamp(self.min_page_size, self.max_page_size.max(self.min_page_size))
  }
}

/// Bounds and pacing of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationOptions {
  /// Size of the first page; later pages follow `adaptive` when set
  pub page_size: u32,
  pub adaptive: Option<AdaptivePageSize>,
  /// Page ceiling guarding against an upstream that never stops
  pub max_pages: u32,
  /// Attempts per page for network failures and timeouts
  pub page_retries: u32,
  /// Failed pages in a row that end the run
  pub max_consecutive_failures: u32,
  /// Item ceiling
  pub max_items: usize,
  /// Deadline for the whole run
  pub max_duration: Duration,
  /// Pause between page requests
  pub page_delay: Duration,
  /// Pages slower than this are logged
  pub slow_page_threshold: Duration,
}

impl Default for PaginationOptions {
  fn default() -> Self {
    Self {
      page_size: 100,
      adaptive: None,
      max_pages: 50,
      page_retries: 3,
      max_consecutive_failures: 3,
      max_items: 50_000,
      max_duration: Duration::from_secs(60),
      page_delay: Duration::from_millis(100),
      slow_page_threshold: Duration::from_secs(5),
    }
  }
}

/// The endpoint and filters of a run. `page` and `pageSize` are added per page.
#[derive(Debug, Clone)]
pub struct PageRequest {
  pub url: String,
  pub filters: Params,
}

impl PageRequest {
  pub fn new(url: impl Into<String>, filters: Params) -> Self {
    Self {
      url: url.into(),
      filters,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AggregationResult<T> {
  pub items: Vec<T>,
  pub progress: PaginationProgress,
  pub summary: AggregationSummary,
}

/// Fetches every page of an endpoint through a [`RequestCoordinator`].
///
/// Page failures are handled per kind:
///
/// - `AuthExpired`: one forced token refresh and one retry, then skip
/// - `Network` / `Timeout`: up to `page_retries` attempts with the
///   coordinator's backoff, then skip
/// - `Decode` / `CircuitOpen` / `InvalidUrl`: skip immediately
/// - `Cancelled`: stop the run as cancelled
#[derive(Clone)]
pub struct PaginatedAggregator {
  coordinator: RequestCoordinator,
  tokens: Arc<dyn TokenProvider>,
  options: PaginationOptions,
}

impl PaginatedAggregator {
  pub fn new(
    coordinator: RequestCoordinator,
    tokens: Arc<dyn TokenProvider>,
    options: PaginationOptions,
  ) -> Self {
    Self {
      coordinator,
      tokens,
      options,
    }
  }

  pub fn options(&self) -> &PaginationOptions {
    &self.options
  }

  /// Walk all pages of `request`, accumulating items.
  ///
  /// Only an unusable base URL is an error; page failures, ceilings and
  /// cancellation end up in the returned summary.
  pub async fn fetch_all<T>(
    &self,
    request: &PageRequest,
    sink: &dyn ProgressSink,
    cancel: &CancellationFlag,
  ) -> Result<AggregationResult<T>, FetchError>
  where
    T: DeserializeOwned + PageItem,
  {
    let base = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
      url: request.url.clone(),
      message: e.to_string(),
    })?;

    let started_at = Instant::now();
    let mut progress = PaginationProgress::new(started_at);
    let mut items: Vec<T> = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    let mut consecutive_failures = 0u32;
    // Page count as declared by the upstream, unlike the running estimate.
    let mut declared_pages: Option<u32> = None;
    let mut page = 1u32;
    let mut page_size = self.options.page_size;

    tracing::info!(url = %request.url, page_size, "Starting paginated fetch");

    let reason = loop {
      if cancel.is_cancelled() {
        break CompletionReason::Cancelled;
      }
      if page > self.options.max_pages {
        tracing::warn!(max_pages = self.options.max_pages, "Page ceiling reached");
        break CompletionReason::ErrorLimitReached;
      }
      if started_at.elapsed() >= self.options.max_duration {
        tracing::warn!(
          elapsed_ms = started_at.elapsed().as_millis() as u64,
          "Paginated fetch deadline passed"
        );
        break CompletionReason::Timeout;
      }
      if page > 1 && !self.options.page_delay.is_zero() {
        tokio::time::sleep(self.options.page_delay).await;
        if cancel.is_cancelled() {
          break CompletionReason::Cancelled;
        }
      }

      progress.current_page = page;
      let url = self.page_url(&base, &request.filters, page, page_size);
      let page_started = Instant::now();

      let stop = match self.fetch_page::<T>(&url, page, page_size, cancel).await {
        Ok(fetched) => {
          let page_time = page_started.elapsed();
          if page_time > self.options.slow_page_threshold {
            let elapsed_ms = page_time.as_millis() as u64;
            tracing::warn!(page, page_size, elapsed_ms, "Slow page");
          }
          progress.page_timings.push(page_time);
          consecutive_failures = 0;

          if fetched.total_pages.is_some() {
            declared_pages = fetched.total_pages;
            progress.total_pages = fetched.total_pages;
          } else if fetched.has_next {
            progress.total_pages = Some(progress.total_pages.unwrap_or(0).max(page + 1));
          }
          if fetched.total_items.is_some() {
            progress.estimated_total_items = fetched.total_items;
          }

          let count = fetched.items.len();
          for item in fetched.items {
            if let Some(key) = item.dedup_key() {
              if !seen.insert(key) {
                duplicates += 1;
                continue;
              }
            }
            items.push(item);
          }
          progress.items_fetched = items.len();

          tracing::debug!(
            page,
            count,
            total = items.len(),
            has_next = fetched.has_next,
            "page fetched"
          );

          if let (Some(adaptive), Some(average)) =
            (self.options.adaptive, progress.average_page_time())
          {
            let next = adaptive.next_size(page_size, average);
            if next != page_size {
              tracing::info!(
                from = page_size,
                to = next,
                average_ms = average.as_millis() as u64,
                "Adjusting page size"
              );
              page_size = next;
            }
          }

          if !fetched.has_next {
            progress.total_pages = Some(page);
            Some(CompletionReason::Completed)
          } else if items.len() >= self.options.max_items {
            tracing::warn!(max_items = self.options.max_items, "Item ceiling reached");
            Some(CompletionReason::ErrorLimitReached)
          } else {
            None
          }
        }
        Err(FetchError::Cancelled) => Some(CompletionReason::Cancelled),
        Err(e) => {
          tracing::warn!(page, error = %e, "Page failed, skipping");
          progress.errors.push(PageError {
            page,
            message: e.to_string(),
          });
          consecutive_failures += 1;

          if consecutive_failures >= self.options.max_consecutive_failures {
            tracing::warn!(consecutive_failures, "Too many consecutive page failures");
            Some(CompletionReason::ErrorLimitReached)
          } else if declared_pages.is_some_and(|total| page >= total) {
            Some(CompletionReason::Completed)
          } else {
            None
          }
        }
      };

      sink.on_progress(&progress);
      if let Some(reason) = stop {
        break reason;
      }
      page += 1;
    };

    progress.completion_reason = Some(reason);
    let summary = AggregationSummary::from_progress(&progress, reason);
    sink.on_finished(&summary);

    tracing::info!(
      items = summary.total_items,
      pages_succeeded = summary.pages_succeeded,
      pages_failed = summary.errors.len(),
      duplicates,
      elapsed_ms = summary.elapsed.as_millis() as u64,
      reason = %reason,
      outcome = %summary.outcome,
      "Paginated fetch finished"
    );

    Ok(AggregationResult {
      items,
      progress,
      summary,
    })
  }

  fn page_url(&self, base: &Url, filters: &Params, page: u32, page_size: u32) -> String {
    let mut url = base.clone();
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("page", &page.to_string())
        .append_pair("pageSize", &page_size.to_string());
      for (name, value) in filters.query_pairs() {
        query.append_pair(name, &value);
      }
    }
    url.into()
  }

  async fn fetch_page<T: DeserializeOwned>(
    &self,
    url: &str,
    page: u32,
    page_size: u32,
    cancel: &CancellationFlag,
  ) -> Result<Page<T>, FetchError> {
    let retry = &self.coordinator.options().retry;
    let mut attempt = 1;
    let mut refreshed = false;
    let mut force_refresh = false;

    loop {
      let token = self.tokens.token(force_refresh).await.map_err(|e| {
        tracing::warn!(page, error = %e, "Could not obtain API token");
        FetchError::AuthExpired {
          url: url.to_string(),
        }
      })?;
      force_refresh = false;
      let options = RequestOptions::get().bearer(&token);

      match self.coordinator.fetch::<Value>(url, &options).await {
        Ok(body) => {
          return parse_page(&body, page, page_size).map_err(|message| {
            FetchError::Decode {
              url: url.to_string(),
              message,
            }
          })
        }
        Err(FetchError::AuthExpired { .. }) if !refreshed => {
          tracing::info!(page, "Token rejected, refreshing");
          refreshed = true;
          force_refresh = true;
        }
        Err(e) if e.is_retryable() && attempt < self.options.page_retries => {
          let delay = retry.backoff_duration(attempt);
          tracing::debug!(
            page,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "retrying page"
          );
          tokio::time::sleep(delay).await;
          if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
          }
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

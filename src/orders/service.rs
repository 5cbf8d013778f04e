//! Order data access for the dashboard.
//!
//! Composes the cache, the request coordinator and the paginated aggregator.
//! Listings are served from cache when possible and only complete aggregations
//! are cached, so a degraded result is never replayed as if it were whole.

use std::sync::Arc;

use crate::aggregator::{
  AggregationSummary, CancellationFlag, NoopSink, PageRequest, PaginatedAggregator,
  PaginationOptions, ProgressSink,
};
use crate::auth::TokenProvider;
use crate::cache::{CachePreset, CacheStore, Params};
use crate::request::{
  CircuitBreakerPolicy, FetchError, RequestCoordinator, RequestOptions, RequestPreset,
};

use super::api_types::{ApiOrder, ApiOrderResponse};
use super::types::{Order, OrderQuery};

/// Cache endpoint for order listings
const ORDERS_ENDPOINT: &str = "orders";
/// Cache endpoint for single orders
const ORDER_DETAILS_ENDPOINT: &str = "order-details";

/// Where a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  Cache,
  Network,
}

#[derive(Debug, Clone)]
pub struct OrdersResult {
  pub orders: Vec<Order>,
  pub source: DataSource,
  /// Present when the listing was aggregated just now
  pub summary: Option<AggregationSummary>,
}

#[derive(Clone)]
pub struct OrdersService {
  base_url: String,
  cache: CacheStore,
  coordinator: RequestCoordinator,
  aggregator: PaginatedAggregator,
  tokens: Arc<dyn TokenProvider>,
  breaker: CircuitBreakerPolicy,
}

impl OrdersService {
  pub fn new(
    base_url: impl Into<String>,
    cache: CacheStore,
    coordinator: RequestCoordinator,
    tokens: Arc<dyn TokenProvider>,
    pagination: PaginationOptions,
    breaker: CircuitBreakerPolicy,
  ) -> Self {
    let aggregator = PaginatedAggregator::new(coordinator.clone(), Arc::clone(&tokens), pagination);
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      cache,
      coordinator,
      aggregator,
      tokens,
      breaker,
    }
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn coordinator(&self) -> &RequestCoordinator {
    &self.coordinator
  }

  fn listing_request(&self, query: &OrderQuery) -> PageRequest {
    PageRequest::new(format!("{}/orders", self.base_url), query.params())
  }

  /// All orders matching `query`, from cache or aggregated from the upstream.
  pub async fn fetch_orders(
    &self,
    query: &OrderQuery,
    sink: &dyn ProgressSink,
    cancel: &CancellationFlag,
  ) -> Result<OrdersResult, FetchError> {
    let params = query.params();
    if let Some(orders) = self.cache.get::<Vec<Order>>(ORDERS_ENDPOINT, &params) {
      tracing::debug!(count = orders.len(), "orders served from cache");
      return Ok(OrdersResult {
        orders,
        source: DataSource::Cache,
        summary: None,
      });
    }
    self.refresh_orders(query, sink, cancel).await
  }

  /// Aggregate `query` from the upstream without consulting the cache.
  ///
  /// A complete listing replaces whatever was cached for the query.
  pub async fn refresh_orders(
    &self,
    query: &OrderQuery,
    sink: &dyn ProgressSink,
    cancel: &CancellationFlag,
  ) -> Result<OrdersResult, FetchError> {
    let params = query.params();
    let result = self
      .aggregator
      .fetch_all::<ApiOrder>(&self.listing_request(query), sink, cancel)
      .await?;
    let orders = within_window(query, result.items);

    if result.summary.is_complete() {
      self.cache.set(ORDERS_ENDPOINT, &params, &orders, None);
    } else {
      let summary = result.summary.describe();
      tracing::warn!(%summary, "Not caching incomplete order listing");
    }

    Ok(OrdersResult {
      orders,
      source: DataSource::Network,
      summary: Some(result.summary),
    })
  }

  /// Cached orders immediately, refreshed in the background.
  ///
  /// On a cache miss the listing is aggregated and awaited. An incomplete
  /// aggregation is reported as an error so it is never cached.
  pub async fn fetch_orders_swr(&self, query: &OrderQuery) -> Result<Vec<Order>, FetchError> {
    let aggregator = self.aggregator.clone();
    let request = self.listing_request(query);
    let window = query.clone();

    self
      .cache
      .refresh_in_background(ORDERS_ENDPOINT, &query.params(), move || async move {
        let result = aggregator
          .fetch_all::<ApiOrder>(&request, &NoopSink, &CancellationFlag::new())
          .await?;
        if !result.summary.is_complete() {
          return Err(FetchError::Network {
            url: request.url,
            status: None,
            message: format!("incomplete listing: {}", result.summary.describe()),
          });
        }
        Ok(within_window(&window, result.items))
      })
      .await
  }

  /// One order by id, cached with the order-details lifetime.
  pub async fn fetch_order(&self, id: &str) -> Result<Order, FetchError> {
    let params = Params::new().with("id", id);
    if let Some(order) = self.cache.get::<Order>(ORDER_DETAILS_ENDPOINT, &params) {
      return Ok(order);
    }

    let url = format!("{}/orders/{}", self.base_url, id);
    let token = self.tokens.token(false).await.map_err(|e| {
      tracing::warn!(error = %e, "Could not obtain API token");
      FetchError::AuthExpired { url: url.clone() }
    })?;
    let options = RequestOptions::get()
      .bearer(&token)
      .with_timeout(RequestPreset::DetailsApi.timeout());

    let order = self
      .coordinator
      .fetch_with_circuit_breaker::<ApiOrderResponse>(&url, &options, &self.breaker)
      .await?
      .into_order();

    self
      .cache
      .set_with_preset(ORDER_DETAILS_ENDPOINT, &params, &order, CachePreset::OrderDetails);
    Ok(order)
  }

  /// Drop every cached listing and order.
  pub fn invalidate_orders(&self) {
    self.cache.invalidate_endpoint(ORDERS_ENDPOINT);
    self.cache.invalidate_endpoint(ORDER_DETAILS_ENDPOINT);
  }

  /// Cancel in-flight requests and stop the cache sweep.
  pub fn shutdown(&self) {
    let cancelled = self.coordinator.cancel_pending_requests();
    self.cache.dispose();
    tracing::info!(cancelled, "Orders service shut down");
  }
}

/// Converts listing items, dropping orders dated outside the query window.
fn within_window(query: &OrderQuery, items: Vec<ApiOrder>) -> Vec<Order> {
  let fetched = items.len();
  let orders: Vec<Order> = items
    .into_iter()
    .map(ApiOrder::into_order)
    .filter(|order| query.contains_date(&order.order_date))
    .collect();
  if orders.len() < fetched {
    tracing::debug!(dropped = fetched - orders.len(), "Orders outside the date window dropped");
  }
  orders
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregator::Outcome;
  use crate::auth::StaticToken;
  use crate::cache::{CacheOptions, MemoryStore};
  use crate::request::{CoordinatorOptions, HttpRequest, HttpTransport, RawResponse};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::time::Duration;

  /// Two pages of two orders each; page 2 can be made to fail.
  #[derive(Default)]
  struct FakeOrdersApi {
    calls: AtomicUsize,
    fail_page_two: AtomicBool,
  }

  #[async_trait]
  impl HttpTransport for FakeOrdersApi {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      if let Some(id) = request.url.strip_prefix("https://api.test/orders/") {
        let body = json!({"success": true, "data": {"id": id, "order_no": "ORD-9"}});
        return Ok(RawResponse::new(200, body.to_string()));
      }

      let page = if request.url.contains("page=2") { 2 } else { 1 };
      if page == 2 && self.fail_page_two.load(Ordering::SeqCst) {
        return Ok(RawResponse::new(400, "{}"));
      }
      let body = json!({
        "success": true,
        "data": {
          "data": [
            {"id": format!("o-{}a", page), "order_date": "2024-03-01T09:00:00Z"},
            {"id": format!("o-{}b", page), "order_date": "2024-03-05T09:00:00Z"}
          ],
          "pagination": {"page": page, "totalPages": 2, "hasNext": page < 2}
        }
      });
      Ok(RawResponse::new(200, body.to_string()))
    }
  }

  fn service(api: &Arc<FakeOrdersApi>) -> OrdersService {
    let coordinator = RequestCoordinator::with_shared_transport(
      Arc::clone(api) as Arc<dyn HttpTransport>,
      CoordinatorOptions::default(),
    );
    let pagination = PaginationOptions {
      page_retries: 1,
      page_delay: Duration::ZERO,
      ..PaginationOptions::default()
    };
    OrdersService::new(
      "https://api.test/",
      CacheStore::new(MemoryStore::new(), CacheOptions::default()),
      coordinator,
      Arc::new(StaticToken("t".into())),
      pagination,
      CircuitBreakerPolicy::default(),
    )
  }

  #[tokio::test]
  async fn test_listing_is_cached() {
    let api = Arc::new(FakeOrdersApi::default());
    let service = service(&api);
    let query = OrderQuery::default().with_status("PENDING");

    let first = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(first.source, DataSource::Network);
    assert_eq!(first.orders.len(), 4);
    assert_eq!(first.summary.unwrap().outcome, Outcome::Success);
    assert_eq!(api.calls.load(Ordering::SeqCst), 2);

    let second = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(second.source, DataSource::Cache);
    assert_eq!(second.orders, first.orders);
    assert_eq!(api.calls.load(Ordering::SeqCst), 2);

    service.invalidate_orders();
    let third = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(third.source, DataSource::Network);
    service.shutdown();
  }

  #[tokio::test]
  async fn test_refresh_skips_cached_listing() {
    let api = Arc::new(FakeOrdersApi::default());
    let service = service(&api);
    let query = OrderQuery::default();

    service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    let refreshed = service
      .refresh_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(refreshed.source, DataSource::Network);
    assert_eq!(api.calls.load(Ordering::SeqCst), 4);

    let cached = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(cached.source, DataSource::Cache);
    assert_eq!(cached.orders, refreshed.orders);
  }

  #[tokio::test]
  async fn test_partial_listing_is_not_cached() {
    let api = Arc::new(FakeOrdersApi::default());
    api.fail_page_two.store(true, Ordering::SeqCst);
    let service = service(&api);
    let query = OrderQuery::default();

    let first = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(first.orders.len(), 2);
    assert_eq!(first.summary.unwrap().outcome, Outcome::Partial);

    let second = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    assert_eq!(second.source, DataSource::Network);
  }

  #[tokio::test]
  async fn test_swr_rejects_incomplete_listing() {
    let api = Arc::new(FakeOrdersApi::default());
    api.fail_page_two.store(true, Ordering::SeqCst);
    let service = service(&api);

    let err = service
      .fetch_orders_swr(&OrderQuery::default())
      .await
      .unwrap_err();
    assert!(err.to_string().contains("incomplete listing"));
    assert!(service
      .cache()
      .get::<Vec<Order>>(ORDERS_ENDPOINT, &OrderQuery::default().params())
      .is_none());

    api.fail_page_two.store(false, Ordering::SeqCst);
    let orders = service.fetch_orders_swr(&OrderQuery::default()).await.unwrap();
    assert_eq!(orders.len(), 4);
  }

  #[tokio::test]
  async fn test_orders_outside_date_window_are_dropped() {
    let api = Arc::new(FakeOrdersApi::default());
    let service = service(&api);
    let query = OrderQuery {
      date_from: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
      date_to: chrono::NaiveDate::from_ymd_opt(2024, 3, 2),
      ..OrderQuery::default()
    };

    let result = service
      .fetch_orders(&query, &NoopSink, &CancellationFlag::new())
      .await
      .unwrap();
    let ids: Vec<&str> = result.orders.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["o-1a", "o-2a"]);

    let swr = service.fetch_orders_swr(&query).await.unwrap();
    assert_eq!(swr, result.orders);
  }

  #[tokio::test]
  async fn test_single_order_is_cached() {
    let api = Arc::new(FakeOrdersApi::default());
    let service = service(&api);

    let order = service.fetch_order("o-77").await.unwrap();
    assert_eq!(order.id, "o-77");
    assert_eq!(order.order_no, "ORD-9");

    let again = service.fetch_order("o-77").await.unwrap();
    assert_eq!(again, order);
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);
  }
}

//! Request coordination: deduplication, timeouts, retries, circuit breaking.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::breaker::{endpoint_of, CircuitBreakerPolicy, CircuitState};
use super::error::FetchError;
use super::retry::RetryPolicy;
use super::transport::{HttpRequest, HttpTransport, RequestOptions};

/// Timeouts tuned for the upstream APIs the dashboard talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPreset {
  OrdersApi,
  DashboardApi,
  DetailsApi,
}

impl RequestPreset {
  pub fn timeout(self) -> Duration {
    match self {
      RequestPreset::OrdersApi => Duration::from_secs(15),
      RequestPreset::DashboardApi => Duration::from_secs(10),
      RequestPreset::DetailsApi => Duration::from_secs(20),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
  /// Default per-request timeout
  pub timeout: Duration,
  /// Backoff used by [`RequestCoordinator::fetch_with_retry`]
  pub retry: RetryPolicy,
}

impl Default for CoordinatorOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      retry: RetryPolicy::default(),
    }
  }
}

impl CoordinatorOptions {
  pub fn from_preset(preset: RequestPreset) -> Self {
    Self {
      timeout: preset.timeout(),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStats {
  pub pending_requests: usize,
  pub open_circuits: usize,
}

/// One entry of a [`RequestCoordinator::batch_fetch`] call.
#[derive(Debug, Clone)]
pub struct BatchRequest {
  pub url: String,
  pub options: RequestOptions,
}

impl BatchRequest {
  pub fn new(url: impl Into<String>, options: RequestOptions) -> Self {
    Self {
      url: url.into(),
      options,
    }
  }
}

/// Identity of a request for deduplication: method, url, headers and body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(url: &str, options: &RequestOptions) -> Self {
    let headers = serde_json::to_string(&options.headers).unwrap_or_default();
    let input = format!(
      "{}:{}:{}:{}",
      options.method,
      url,
      headers,
      options.body.as_deref().unwrap_or("")
    );

    // SHA256 keeps keys fixed-length regardless of body size
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

type SharedResponse = Shared<BoxFuture<'static, Result<Arc<Value>, FetchError>>>;

struct PendingRequest {
  id: u64,
  response: SharedResponse,
  task: AbortHandle,
  started_at: Instant,
}

struct CoordinatorInner {
  transport: Arc<dyn HttpTransport>,
  options: CoordinatorOptions,
  pending: Mutex<HashMap<RequestKey, PendingRequest>>,
  circuits: Mutex<HashMap<String, CircuitState>>,
  next_id: AtomicU64,
}

/// Coordinates network requests for the whole application.
///
/// At most one transport call is in flight per [`RequestKey`]; identical
/// requests issued while it is pending share its outcome. Cloning is cheap and
/// clones share state.
#[derive(Clone)]
pub struct RequestCoordinator {
  inner: Arc<CoordinatorInner>,
}

impl RequestCoordinator {
  pub fn new(transport: impl HttpTransport + 'static, options: CoordinatorOptions) -> Self {
    Self::with_shared_transport(Arc::new(transport), options)
  }

  pub fn with_shared_transport(
    transport: Arc<dyn HttpTransport>,
    options: CoordinatorOptions,
  ) -> Self {
    Self {
      inner: Arc::new(CoordinatorInner {
        transport,
        options,
        pending: Mutex::new(HashMap::new()),
        circuits: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  pub fn options(&self) -> &CoordinatorOptions {
    &self.inner.options
  }

  /// Fetch `url` and decode its JSON body as `T`.
  ///
  /// Joins an identical pending request if there is one. Non-2xx responses
  /// fail with [`FetchError::AuthExpired`] (401) or [`FetchError::Network`].
  pub async fn fetch<T: DeserializeOwned>(
    &self,
    url: &str,
    options: &RequestOptions,
  ) -> Result<T, FetchError> {
    let value = self.fetch_shared(url, options).await?;
    T::deserialize(value.as_ref()).map_err(|e| FetchError::Decode {
      url: url.to_string(),
      message: e.to_string(),
    })
  }

  /// [`fetch`](Self::fetch), retried with exponential backoff.
  ///
  /// Makes at most `max_retries` attempts in total and returns the last error.
  /// Errors that cannot succeed on retry are returned immediately.
  pub async fn fetch_with_retry<T: DeserializeOwned>(
    &self,
    url: &str,
    options: &RequestOptions,
    max_retries: u32,
  ) -> Result<T, FetchError> {
    let attempts = max_retries.max(1);
    let mut attempt = 1;
    loop {
      match self.fetch::<T>(url, options).await {
        Ok(data) => return Ok(data),
        Err(e) if attempt >= attempts || !e.is_retryable() => return Err(e),
        Err(e) => {
          let delay = self.inner.options.retry.backoff_duration(attempt);
          tracing::warn!(
            url,
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Request failed, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }

  /// [`fetch`](Self::fetch) behind the breaker for the URL's path.
  pub async fn fetch_with_circuit_breaker<T: DeserializeOwned>(
    &self,
    url: &str,
    options: &RequestOptions,
    policy: &CircuitBreakerPolicy,
  ) -> Result<T, FetchError> {
    let endpoint = endpoint_of(url);

    let open = self
      .inner
      .circuits()
      .get(&endpoint)
      .is_some_and(|state| state.is_open(Instant::now(), policy.recovery_window));
    if open {
      return Err(FetchError::CircuitOpen { endpoint });
    }

    let result = self.fetch::<T>(url, options).await;

    let mut circuits = self.inner.circuits();
    match &result {
      Ok(_) => {
        if let Some(state) = circuits.get_mut(&endpoint) {
          if state.consecutive_failures > 0 {
            tracing::info!(endpoint = %endpoint, "Circuit breaker closed");
          }
          state.record_success();
        }
      }
      // Caller-initiated aborts say nothing about endpoint health.
      Err(FetchError::Cancelled) => {}
      Err(_) => {
        let state = circuits.entry(endpoint.clone()).or_default();
        if state.record_failure(Instant::now(), policy.failure_threshold) {
          tracing::warn!(
            endpoint = %endpoint,
            failures = state.consecutive_failures,
            "Circuit breaker opened"
          );
        }
      }
    }

    result
  }

  /// Fetch all requests concurrently, preserving order.
  ///
  /// Fails as soon as any request fails.
  pub async fn batch_fetch<T: DeserializeOwned>(
    &self,
    requests: &[BatchRequest],
  ) -> Result<Vec<T>, FetchError> {
    tracing::debug!(count = requests.len(), "batching requests");
    let results = futures::future::try_join_all(
      requests
        .iter()
        .map(|request| self.fetch::<T>(&request.url, &request.options)),
    )
    .await;

    if let Err(e) = &results {
      tracing::warn!(error = %e, "Batch request failed");
    }
    results
  }

  /// Reject every pending request with [`FetchError::Cancelled`] and abort
  /// the underlying transport calls.
  pub fn cancel_pending_requests(&self) -> usize {
    let drained: Vec<PendingRequest> = self
      .inner
      .pending()
      .drain()
      .map(|(_, request)| request)
      .collect();

    for request in &drained {
      // Dropping the task's result sender rejects every waiter.
      request.task.abort();
      tracing::debug!(
        id = request.id,
        age_ms = request.started_at.elapsed().as_millis() as u64,
        "cancelled pending request"
      );
    }

    if !drained.is_empty() {
      tracing::info!(count = drained.len(), "Cancelled pending requests");
    }
    drained.len()
  }

  /// State of the breaker for `endpoint` (a URL path), if it has seen traffic.
  pub fn circuit_state(&self, endpoint: &str) -> Option<CircuitState> {
    self.inner.circuits().get(endpoint).cloned()
  }

  /// Counts of pending requests and of breakers open under `policy`.
  pub fn stats(&self, policy: &CircuitBreakerPolicy) -> RequestStats {
    let now = Instant::now();
    RequestStats {
      pending_requests: self.inner.pending().len(),
      open_circuits: self
        .inner
        .circuits()
        .values()
        .filter(|state| state.is_open(now, policy.recovery_window))
        .count(),
    }
  }

  fn fetch_shared(&self, url: &str, options: &RequestOptions) -> SharedResponse {
    let key = RequestKey::new(url, options);
    let mut pending = self.inner.pending();

    if let Some(existing) = pending.get(&key) {
      tracing::debug!(url, "joining pending request");
      return existing.response.clone();
    }

    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    let request = HttpRequest::new(url, options);
    let timeout = options.timeout.unwrap_or(self.inner.options.timeout);

    let inner = Arc::clone(&self.inner);
    let task_key = key.clone();
    let task = tokio::spawn(async move {
      let result = execute(inner.transport.as_ref(), request, timeout).await;
      inner.settle(&task_key, id);
      let _ = tx.send(result);
    });

    let response = rx
      .map(|received| received.unwrap_or(Err(FetchError::Cancelled)))
      .boxed()
      .shared();

    pending.insert(
      key,
      PendingRequest {
        id,
        response: response.clone(),
        task: task.abort_handle(),
        started_at: Instant::now(),
      },
    );
    response
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CoordinatorInner {
  fn pending(&self) -> MutexGuard<'_, HashMap<RequestKey, PendingRequest>> {
    lock(&self.pending)
  }

  fn circuits(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
    lock(&self.circuits)
  }

  /// Forget a request once it has settled, unless it was already replaced.
  fn settle(&self, key: &RequestKey, id: u64) {
    let mut pending = self.pending();
    if pending.get(key).is_some_and(|request| request.id == id) {
      pending.remove(key);
    }
  }
}

async fn execute(
  transport: &dyn HttpTransport,
  request: HttpRequest,
  timeout: Duration,
) -> Result<Arc<Value>, FetchError> {
  let url = request.url.clone();
  tracing::debug!(method = %request.method, url = %url, "executing request");

  let response = match tokio::time::timeout(timeout, transport.send(request)).await {
    Ok(result) => result?,
    Err(_) => {
      tracing::warn!(url = %url, timeout_ms = timeout.as_millis() as u64, "Request timed out");
      return Err(FetchError::Timeout { url, timeout });
    }
  };

  if response.status == 401 {
    return Err(FetchError::AuthExpired { url });
  }
  if !response.ok() {
    return Err(FetchError::Network {
      message: format!("HTTP {}", response.status),
      status: Some(response.status),
      url,
    });
  }

  let value: Value = response.json().map_err(|e| FetchError::Decode {
    url: url.clone(),
    message: e.to_string(),
  })?;
  tracing::debug!(url = %url, "request completed");
  Ok(Arc::new(value))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::transport::RawResponse;
  use async_trait::async_trait;
  use serde_json::json;
  use std::collections::VecDeque;
  use std::sync::atomic::AtomicUsize;

  /// Transport replaying scripted responses and counting calls.
  struct ScriptedTransport {
    calls: AtomicUsize,
    latency: Duration,
    script: Mutex<VecDeque<Result<RawResponse, FetchError>>>,
    fallback: Result<RawResponse, FetchError>,
  }

  impl ScriptedTransport {
    fn always(response: Result<RawResponse, FetchError>) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        latency: Duration::from_millis(20),
        script: Mutex::new(VecDeque::new()),
        fallback: response,
      }
    }

    fn then(self, response: Result<RawResponse, FetchError>) -> Self {
      self.script.lock().unwrap().push_back(response);
      self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
      self.latency = latency;
      self
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl HttpTransport for ScriptedTransport {
    async fn send(&self, _request: HttpRequest) -> Result<RawResponse, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.latency).await;
      let scripted = self.script.lock().unwrap().pop_front();
      scripted.unwrap_or_else(|| self.fallback.clone())
    }
  }

  fn ok(body: serde_json::Value) -> Result<RawResponse, FetchError> {
    Ok(RawResponse::new(200, body.to_string()))
  }

  fn status(code: u16) -> Result<RawResponse, FetchError> {
    Ok(RawResponse::new(code, "{}"))
  }

  fn coordinator(transport: &Arc<ScriptedTransport>) -> RequestCoordinator {
    RequestCoordinator::with_shared_transport(
      Arc::clone(transport) as Arc<dyn HttpTransport>,
      CoordinatorOptions::default(),
    )
  }

  const URL: &str = "https://api.example.com/orders?page=1";

  #[test]
  fn test_request_key_identity() {
    let a = RequestOptions::get().header("X-A", "1").header("X-B", "2");
    let b = RequestOptions::get().header("X-B", "2").header("X-A", "1");
    assert_eq!(RequestKey::new(URL, &a), RequestKey::new(URL, &b));
    assert_ne!(
      RequestKey::new(URL, &a),
      RequestKey::new(URL, &RequestOptions::post("{}"))
    );
    // Timeouts are not part of identity.
    assert_eq!(
      RequestKey::new(URL, &a),
      RequestKey::new(URL, &a.clone().with_timeout(Duration::from_secs(1)))
    );
    assert_eq!(RequestKey::new(URL, &a).as_str().len(), 64);
  }

  #[tokio::test]
  async fn test_concurrent_identical_requests_share_one_call() {
    let transport = Arc::new(ScriptedTransport::always(ok(json!({"orders": [1, 2]}))));
    let coordinator = coordinator(&transport);
    let options = RequestOptions::get();

    let results = futures::future::join_all(
      (0..5).map(|_| coordinator.fetch::<serde_json::Value>(URL, &options)),
    )
    .await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(results.len(), 5);
    for result in results {
      assert_eq!(result.unwrap(), json!({"orders": [1, 2]}));
    }
    assert_eq!(
      coordinator.stats(&CircuitBreakerPolicy::default()).pending_requests,
      0
    );
  }

  #[tokio::test]
  async fn test_sequential_requests_are_not_deduplicated() {
    let transport = Arc::new(ScriptedTransport::always(ok(json!(1))));
    let coordinator = coordinator(&transport);

    coordinator
      .fetch::<u32>(URL, &RequestOptions::get())
      .await
      .unwrap();
    coordinator
      .fetch::<u32>(URL, &RequestOptions::get())
      .await
      .unwrap();
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_different_bodies_are_separate_requests() {
    let transport = Arc::new(ScriptedTransport::always(ok(json!(1))));
    let coordinator = coordinator(&transport);
    let a = RequestOptions::post(r#"{"id":1}"#);
    let b = RequestOptions::post(r#"{"id":2}"#);

    let (ra, rb) = tokio::join!(
      coordinator.fetch::<u32>(URL, &a),
      coordinator.fetch::<u32>(URL, &b)
    );
    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_failure_reaches_every_joined_caller() {
    let transport = Arc::new(ScriptedTransport::always(status(503)));
    let coordinator = coordinator(&transport);
    let options = RequestOptions::get();

    let (a, b) = tokio::join!(
      coordinator.fetch::<u32>(URL, &options),
      coordinator.fetch::<u32>(URL, &options)
    );
    assert_eq!(transport.calls(), 1);
    assert_eq!(a.unwrap_err().status(), Some(503));
    assert_eq!(b.unwrap_err().status(), Some(503));
  }

  #[tokio::test]
  async fn test_unauthorized_maps_to_auth_expired() {
    let transport = Arc::new(ScriptedTransport::always(status(401)));
    let coordinator = coordinator(&transport);
    let err = coordinator
      .fetch::<u32>(URL, &RequestOptions::get())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::AuthExpired { .. }));
  }

  #[tokio::test]
  async fn test_decode_error() {
    let transport = Arc::new(ScriptedTransport::always(ok(json!({"not": "a number"}))));
    let coordinator = coordinator(&transport);
    let err = coordinator
      .fetch::<u32>(URL, &RequestOptions::get())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }));
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_distinct_and_clears_pending() {
    let transport = Arc::new(
      ScriptedTransport::always(ok(json!(1))).with_latency(Duration::from_secs(60)),
    );
    let coordinator = coordinator(&transport);
    let options = RequestOptions::get().with_timeout(Duration::from_secs(2));

    let err = coordinator.fetch::<u32>(URL, &options).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout { .. }));
    assert_eq!(
      coordinator.stats(&CircuitBreakerPolicy::default()).pending_requests,
      0
    );

    // A retry after a timeout is a fresh call, not a join.
    let _ = coordinator.fetch::<u32>(URL, &options).await;
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_backoff_on_persistent_failure() {
    let transport = Arc::new(ScriptedTransport::always(status(500)).with_latency(Duration::ZERO));
    let coordinator = coordinator(&transport);

    let started = Instant::now();
    let err = coordinator
      .fetch_with_retry::<u32>(URL, &RequestOptions::get(), 3)
      .await
      .unwrap_err();

    assert_eq!(transport.calls(), 3);
    assert_eq!(err.status(), Some(500));
    assert!(started.elapsed() >= Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_recovers() {
    let transport = Arc::new(
      ScriptedTransport::always(ok(json!(7)))
        .then(status(502))
        .then(Err(FetchError::Network {
          url: URL.into(),
          status: None,
          message: "connection reset".into(),
        })),
    );
    let coordinator = coordinator(&transport);

    let value = coordinator
      .fetch_with_retry::<u32>(URL, &RequestOptions::get(), 3)
      .await
      .unwrap();
    assert_eq!(value, 7);
    assert_eq!(transport.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_skips_non_retryable() {
    let transport = Arc::new(ScriptedTransport::always(status(401)));
    let coordinator = coordinator(&transport);
    let err = coordinator
      .fetch_with_retry::<u32>(URL, &RequestOptions::get(), 3)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::AuthExpired { .. }));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_circuit_breaker_opens_and_recovers() {
    let transport = Arc::new(ScriptedTransport::always(status(500)));
    let coordinator = coordinator(&transport);
    let policy = CircuitBreakerPolicy {
      failure_threshold: 3,
      recovery_window: Duration::from_secs(60),
    };
    let options = RequestOptions::get();

    for page in 0..3 {
      let url = format!("https://api.example.com/orders?page={}", page);
      let err = coordinator
        .fetch_with_circuit_breaker::<u32>(&url, &options, &policy)
        .await
        .unwrap_err();
      assert!(matches!(err, FetchError::Network { .. }));
    }
    assert_eq!(transport.calls(), 3);

    // Open: a different query string of the same path fails fast.
    let err = coordinator
      .fetch_with_circuit_breaker::<u32>("https://api.example.com/orders?page=9", &options, &policy)
      .await
      .unwrap_err();
    assert_eq!(
      err,
      FetchError::CircuitOpen {
        endpoint: "/orders".into()
      }
    );
    assert_eq!(transport.calls(), 3);
    assert_eq!(coordinator.stats(&policy).open_circuits, 1);

    // Other endpoints are unaffected.
    let _ = coordinator
      .fetch_with_circuit_breaker::<u32>("https://api.example.com/inventory", &options, &policy)
      .await;
    assert_eq!(transport.calls(), 4);

    // After the window one trial call goes through; its failure reopens.
    tokio::time::advance(Duration::from_secs(61)).await;
    let err = coordinator
      .fetch_with_circuit_breaker::<u32>(URL, &options, &policy)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
    assert_eq!(transport.calls(), 5);

    let err = coordinator
      .fetch_with_circuit_breaker::<u32>(URL, &options, &policy)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 5);
  }

  #[tokio::test(start_paused = true)]
  async fn test_circuit_breaker_success_closes() {
    let transport = Arc::new(
      ScriptedTransport::always(ok(json!(1)))
        .then(status(500))
        .then(status(500)),
    );
    let coordinator = coordinator(&transport);
    let policy = CircuitBreakerPolicy {
      failure_threshold: 2,
      recovery_window: Duration::from_secs(10),
    };
    let options = RequestOptions::get();

    for _ in 0..2 {
      let _ = coordinator
        .fetch_with_circuit_breaker::<u32>(URL, &options, &policy)
        .await;
    }
    assert!(coordinator.circuit_state("/orders").unwrap().opened_at.is_some());

    tokio::time::advance(Duration::from_secs(11)).await;
    let value = coordinator
      .fetch_with_circuit_breaker::<u32>(URL, &options, &policy)
      .await
      .unwrap();
    assert_eq!(value, 1);
    assert_eq!(
      coordinator.circuit_state("/orders"),
      Some(CircuitState::default())
    );
  }

  #[tokio::test]
  async fn test_batch_fetch_preserves_order() {
    struct EchoTransport;

    #[async_trait]
    impl HttpTransport for EchoTransport {
      async fn send(&self, request: HttpRequest) -> Result<RawResponse, FetchError> {
        let id: u64 = request.url.rsplit('=').next().unwrap().parse().unwrap();
        // Later requests finish first.
        tokio::time::sleep(Duration::from_millis(50 - id * 10)).await;
        Ok(RawResponse::new(200, id.to_string()))
      }
    }

    let coordinator = RequestCoordinator::new(EchoTransport, CoordinatorOptions::default());
    let requests: Vec<BatchRequest> = (1..=4)
      .map(|id| {
        let url = format!("https://api.example.com/orders?id={}", id);
        BatchRequest::new(url, RequestOptions::get())
      })
      .collect();

    let results: Vec<u64> = coordinator.batch_fetch(&requests).await.unwrap();
    assert_eq!(results, vec![1, 2, 3, 4]);
  }

  #[tokio::test]
  async fn test_batch_fetch_fails_fast() {
    let transport = Arc::new(
      ScriptedTransport::always(ok(json!(1)))
        .then(ok(json!(1)))
        .then(status(500)),
    );
    let coordinator = coordinator(&transport);
    let requests = vec![
      BatchRequest::new("https://api.example.com/a", RequestOptions::get()),
      BatchRequest::new("https://api.example.com/b", RequestOptions::get()),
      BatchRequest::new("https://api.example.com/c", RequestOptions::get()),
    ];

    let result = coordinator.batch_fetch::<u32>(&requests).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_cancel_rejects_every_waiter() {
    let transport = Arc::new(
      ScriptedTransport::always(ok(json!(1))).with_latency(Duration::from_secs(30)),
    );
    let coordinator = coordinator(&transport);

    let waiters: Vec<_> = (0..3)
      .map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
          coordinator
            .fetch::<u32>(URL, &RequestOptions::get())
            .await
        })
      })
      .collect();

    // Let the waiters register.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coordinator.cancel_pending_requests(), 1);

    for waiter in waiters {
      let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("cancelled request must not hang")
        .unwrap();
      assert_eq!(result, Err(FetchError::Cancelled));
    }
    assert_eq!(
      coordinator.stats(&CircuitBreakerPolicy::default()).pending_requests,
      0
    );
  }
}

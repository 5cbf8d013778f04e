//! Network request coordination.
//!
//! All dashboard traffic goes through a [`RequestCoordinator`], which collapses
//! identical in-flight requests, enforces timeouts and offers retrying, circuit
//! breaking and batched variants of a plain fetch.

mod breaker;
mod coordinator;
mod error;
mod retry;
mod transport;

pub use breaker::{endpoint_of, CircuitBreakerPolicy, CircuitState};
pub use coordinator::{
  BatchRequest, CoordinatorOptions, RequestCoordinator, RequestKey, RequestPreset, RequestStats,
};
pub use error::FetchError;
pub use retry::RetryPolicy;
pub use transport::{
  HttpRequest, HttpTransport, Method, RawResponse, RequestOptions, ReqwestTransport,
};

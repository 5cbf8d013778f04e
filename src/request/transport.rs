//! The HTTP seam the coordinator sends requests through.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::error::FetchError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    };
    f.write_str(name)
  }
}

/// Per-request settings.
///
/// Method, headers and body take part in request identity; the timeout does
/// not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  /// Overrides the coordinator's default timeout
  pub timeout: Option<Duration>,
}

impl RequestOptions {
  pub fn get() -> Self {
    Self::default()
  }

  pub fn post(body: impl Into<String>) -> Self {
    Self {
      method: Method::Post,
      body: Some(body.into()),
      ..Self::default()
    }
    .header("Content-Type", "application/json")
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn bearer(self, token: &str) -> Self {
    self.header("Authorization", format!("Bearer {}", token))
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

impl HttpRequest {
  pub fn new(url: &str, options: &RequestOptions) -> Self {
    Self {
      method: options.method,
      url: url.to_string(),
      headers: options.headers.clone(),
      body: options.body.clone(),
    }
  }
}

/// Status and body of a completed exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub body: String,
}

impl RawResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_str(&self.body)
  }
}

/// Something that can perform HTTP exchanges.
///
/// Implementations return `Ok` for any response that arrived, including
/// non-2xx ones, and `Err` only for transport failures. Dropping the returned
/// future must abort the exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<RawResponse, FetchError>;
}

/// Transport backed by a shared reqwest client.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<RawResponse, FetchError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let url = request.url;
    let network_error = |e: reqwest::Error| FetchError::Network {
      url: url.clone(),
      status: e.status().map(|s| s.as_u16()),
      message: e.to_string(),
    };

    let response = builder.send().await.map_err(network_error)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(network_error)?;

    Ok(RawResponse { status, body })
  }
}

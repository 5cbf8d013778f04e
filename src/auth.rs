//! Access tokens for the upstream order API.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;

/// Supplies bearer tokens.
///
/// `force_refresh` asks for a token newer than any previously returned one,
/// after the upstream rejected the current token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
  async fn token(&self, force_refresh: bool) -> Result<String>;
}

/// Reads the token from the environment.
///
/// Checks ORDERDECK_API_TOKEN first, then ORDERS_API_TOKEN as fallback. The
/// value is re-read on a forced refresh, so a rotated token is picked up
/// without a restart.
#[derive(Default)]
pub struct EnvTokenProvider {
  cached: Mutex<Option<String>>,
}

impl EnvTokenProvider {
  pub fn new() -> Self {
    Self::default()
  }

  fn read_env() -> Result<String> {
    std::env::var("ORDERDECK_API_TOKEN")
      .or_else(|_| std::env::var("ORDERS_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "API token not found. Set ORDERDECK_API_TOKEN or ORDERS_API_TOKEN environment variable."
        )
      })
  }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
  async fn token(&self, force_refresh: bool) -> Result<String> {
    let mut cached = self
      .cached
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !force_refresh {
      if let Some(token) = cached.as_ref() {
        return Ok(token.clone());
      }
    }

    let token = Self::read_env()?;
    *cached = Some(token.clone());
    Ok(token)
  }
}

/// A fixed token, for tests and for tokens passed on the command line.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
  async fn token(&self, _force_refresh: bool) -> Result<String> {
    Ok(self.0.clone())
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregator::{AdaptivePageSize, PaginationOptions};
use crate::cache::{CacheOptions, CachePreset};
use crate::request::{CircuitBreakerPolicy, CoordinatorOptions, RequestPreset, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub requests: RequestsConfig,
  #[serde(default)]
  pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the order API, e.g. https://orders.example.com/api
  pub base_url: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PresetName {
  #[default]
  OrdersSummary,
  OrderDetails,
  DashboardMetrics,
}

impl From<PresetName> for CachePreset {
  fn from(name: PresetName) -> Self {
    match name {
      PresetName::OrdersSummary => CachePreset::OrdersSummary,
      PresetName::OrderDetails => CachePreset::OrderDetails,
      PresetName::DashboardMetrics => CachePreset::DashboardMetrics,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Lifetimes to start from; the explicit fields below override it
  #[serde(default)]
  pub preset: PresetName,
  pub memory_ttl_secs: Option<u64>,
  pub storage_ttl_secs: Option<u64>,
  #[serde(default = "default_max_memory_items")]
  pub max_memory_items: usize,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  /// Keep the durable tier on disk (SQLite); otherwise in process memory
  #[serde(default = "default_true")]
  pub persist: bool,
  /// Database file (default: $XDG_DATA_HOME/orderdeck/cache.db)
  pub path: Option<PathBuf>,
  /// Byte quota for the durable tier
  pub quota_bytes: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      preset: PresetName::default(),
      memory_ttl_secs: None,
      storage_ttl_secs: None,
      max_memory_items: default_max_memory_items(),
      sweep_interval_secs: default_sweep_interval_secs(),
      persist: true,
      path: None,
      quota_bytes: None,
    }
  }
}

impl CacheConfig {
  pub fn options(&self) -> CacheOptions {
    let mut options = CacheOptions::from_preset(self.preset.into());
    if let Some(secs) = self.memory_ttl_secs {
      options.memory_ttl = Duration::from_secs(secs);
    }
    if let Some(secs) = self.storage_ttl_secs {
      options.storage_ttl = Duration::from_secs(secs);
    }
    options.max_memory_items = self.max_memory_items;
    options.sweep_interval = Duration::from_secs(self.sweep_interval_secs.max(1));
    options
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
  /// Default request timeout; falls back to the orders API preset
  pub timeout_secs: Option<u64>,
  #[serde(default = "default_retry_base_delay_ms")]
  pub retry_base_delay_ms: u64,
  #[serde(default = "default_retry_max_delay_secs")]
  pub retry_max_delay_secs: u64,
  #[serde(default = "default_breaker_threshold")]
  pub breaker_failure_threshold: u32,
  #[serde(default = "default_breaker_recovery_secs")]
  pub breaker_recovery_secs: u64,
}

impl Default for RequestsConfig {
  fn default() -> Self {
    Self {
      timeout_secs: None,
      retry_base_delay_ms: default_retry_base_delay_ms(),
      retry_max_delay_secs: default_retry_max_delay_secs(),
      breaker_failure_threshold: default_breaker_threshold(),
      breaker_recovery_secs: default_breaker_recovery_secs(),
    }
  }
}

impl RequestsConfig {
  pub fn coordinator_options(&self) -> CoordinatorOptions {
    CoordinatorOptions {
      timeout: self
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| RequestPreset::OrdersApi.timeout()),
      retry: RetryPolicy::new(
        Duration::from_millis(self.retry_base_delay_ms),
        Duration::from_secs(self.retry_max_delay_secs),
      ),
    }
  }

  pub fn breaker_policy(&self) -> CircuitBreakerPolicy {
    CircuitBreakerPolicy {
      failure_threshold: self.breaker_failure_threshold.max(1),
      recovery_window: Duration::from_secs(self.breaker_recovery_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  #[serde(default = "default_max_pages")]
  pub max_pages: u32,
  #[serde(default = "default_page_retries")]
  pub page_retries: u32,
  #[serde(default = "default_max_consecutive_failures")]
  pub max_consecutive_failures: u32,
  #[serde(default = "default_max_items")]
  pub max_items: usize,
  #[serde(default = "default_max_duration_secs")]
  pub max_duration_secs: u64,
  #[serde(default = "default_page_delay_ms")]
  pub page_delay_ms: u64,
  #[serde(default = "default_slow_page_threshold_ms")]
  pub slow_page_threshold_ms: u64,
  /// Tune the page size from observed page times
  #[serde(default)]
  pub adaptive_page_size: bool,
  #[serde(default = "default_min_page_size")]
  pub min_page_size: u32,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: u32,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      max_pages: default_max_pages(),
      page_retries: default_page_retries(),
      max_consecutive_failures: default_max_consecutive_failures(),
      max_items: default_max_items(),
      max_duration_secs: default_max_duration_secs(),
      page_delay_ms: default_page_delay_ms(),
      slow_page_threshold_ms: default_slow_page_threshold_ms(),
      adaptive_page_size: false,
      min_page_size: default_min_page_size(),
      max_page_size: default_max_page_size(),
    }
  }
}

impl PaginationConfig {
  pub fn options(&self) -> PaginationOptions {
    let adaptive = self.adaptive_page_size.then(|| {
      let min_page_size = self.min_page_size.max(1);
      AdaptivePageSize {
        min_page_size,
        max_page_size: self.max_page_size.max(min_page_size),
        ..AdaptivePageSize::default()
      }
    });
    PaginationOptions {
      page_size: self.page_size.max(1),
      adaptive,
      max_pages: self.max_pages,
      page_retries: self.page_retries.max(1),
      max_consecutive_failures: self.max_consecutive_failures.max(1),
      max_items: self.max_items,
      max_duration: Duration::from_secs(self.max_duration_secs),
      page_delay: Duration::from_millis(self.page_delay_ms),
      slow_page_threshold: Duration::from_millis(self.slow_page_threshold_ms),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_max_memory_items() -> usize {
  100
}

fn default_sweep_interval_secs() -> u64 {
  60
}

fn default_retry_base_delay_ms() -> u64 {
  1000
}

fn default_retry_max_delay_secs() -> u64 {
  30
}

fn default_breaker_threshold() -> u32 {
  5
}

fn default_breaker_recovery_secs() -> u64 {
  60
}

fn default_page_size() -> u32 {
  100
}

fn default_max_pages() -> u32 {
  50
}

fn default_page_retries() -> u32 {
  3
}

fn default_max_consecutive_failures() -> u32 {
  3
}

fn default_max_items() -> usize {
  50_000
}

fn default_max_duration_secs() -> u64 {
  60
}

fn default_page_delay_ms() -> u64 {
  100
}

fn default_slow_page_threshold_ms() -> u64 {
  5000
}

fn default_min_page_size() -> u32 {
  1000
}

fn default_max_page_size() -> u32 {
  10_000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./orderdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/orderdeck/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/orderdeck/config.yaml\n\
         See orderdeck.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("orderdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("orderdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", config.api.base_url, e))?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://orders.example.com/api\n").unwrap();
    assert_eq!(config.api.base_url, "https://orders.example.com/api");

    let cache = config.cache.options();
    assert_eq!(cache.memory_ttl, Duration::from_secs(300));
    assert_eq!(cache.storage_ttl, Duration::from_secs(1800));
    assert_eq!(cache.max_memory_items, 100);
    assert!(config.cache.persist);

    assert_eq!(config.requests.coordinator_options().timeout, Duration::from_secs(15));
    assert_eq!(config.requests.breaker_policy(), CircuitBreakerPolicy::default());
    assert_eq!(config.pagination.options(), PaginationOptions::default());
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  base_url: https://orders.example.com
cache:
  preset: dashboard-metrics
  storage_ttl_secs: 120
  persist: false
requests:
  timeout_secs: 5
  breaker_failure_threshold: 2
pagination:
  page_size: 25
  max_pages: 10
  page_delay_ms: 0
"#;
    let config = Config::parse(yaml).unwrap();
    let cache = config.cache.options();
    assert_eq!(cache.memory_ttl, Duration::from_secs(120));
    assert_eq!(cache.storage_ttl, Duration::from_secs(120));
    assert!(!config.cache.persist);
    assert_eq!(config.requests.coordinator_options().timeout, Duration::from_secs(5));
    assert_eq!(config.requests.breaker_policy().failure_threshold, 2);

    let pagination = config.pagination.options();
    assert_eq!(pagination.page_size, 25);
    assert_eq!(pagination.max_pages, 10);
    assert_eq!(pagination.page_delay, Duration::ZERO);
    assert_eq!(pagination.page_retries, 3);
    assert_eq!(pagination.adaptive, None);
  }

  #[test]
  fn test_adaptive_page_size() {
    let yaml = r#"
api:
  base_url: https://orders.example.com
pagination:
  page_size: 5000
  adaptive_page_size: true
  min_page_size: 2000
  max_page_size: 500
  slow_page_threshold_ms: 8000
"#;
    let pagination = Config::parse(yaml).unwrap().pagination.options();
    let adaptive = pagination.adaptive.unwrap();
    assert_eq!(adaptive.min_page_size, 2000);
    assert_eq!(adaptive.max_page_size, 2000);
    assert_eq!(adaptive.slow_average, Duration::from_secs(5));
    assert_eq!(pagination.slow_page_threshold, Duration::from_secs(8));
  }

  #[test]
  fn test_invalid_base_url() {
    let err = Config::parse("api:\n  base_url: not a url\n").unwrap_err();
    assert!(err.to_string().contains("Invalid api.base_url"));
  }

  #[test]
  fn test_missing_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
    assert!(err.to_string().starts_with("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orderdeck.yaml");
    std::fs::write(&path, "api:\n  base_url: http://localhost:3000/api\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.api.base_url, "http://localhost:3000/api");
  }
}

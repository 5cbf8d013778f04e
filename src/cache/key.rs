//! Cache key derivation.
//!
//! A key is `endpoint:` followed by the JSON encoding of the parameter map with
//! keys sorted and empty values dropped, so logically identical queries always
//! land on the same entry.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Query parameters for a cached endpoint.
///
/// Backed by a sorted map, so insertion order never affects the derived key.
/// `null` and empty-string values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
  values: BTreeMap<String, Value>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a parameter. Values that normalize to "absent" are skipped.
  pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
    self.insert(name, value);
    self
  }

  /// Add a parameter only when `value` is `Some`.
  pub fn with_opt<V: Serialize>(self, name: impl Into<String>, value: Option<V>) -> Self {
    match value {
      Some(v) => self.with(name, v),
      None => self,
    }
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Serialize) {
    let name = name.into();
    match serde_json::to_value(value) {
      Ok(value) if !is_empty_value(&value) => {
        self.values.insert(name, value);
      }
      _ => {
        self.values.remove(&name);
      }
    }
  }

  /// Build params from a JSON object, dropping empty values.
  /// Anything that is not an object yields empty params.
  pub fn from_value(value: &Value) -> Self {
    let mut params = Self::new();
    if let Some(obj) = value.as_object() {
      for (name, v) in obj {
        params.insert(name.clone(), v);
      }
    }
    params
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  /// Iterate parameters in key order, with values rendered for a query string.
  pub fn query_pairs(&self) -> impl Iterator<Item = (&str, String)> {
    self.values.iter().map(|(k, v)| {
      let rendered = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      (k.as_str(), rendered)
    })
  }
}

fn is_empty_value(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    _ => false,
  }
}

/// Derive the cache key for an endpoint and its parameters.
pub fn cache_key(endpoint: &str, params: &Params) -> String {
  // BTreeMap serialization is already key-sorted.
  let encoded = serde_json::to_string(&params.values).unwrap_or_else(|_| "{}".to_string());
  format!("{}:{}", endpoint, encoded)
}

/// Prefix shared by every key of an endpoint.
pub fn endpoint_prefix(endpoint: &str) -> String {
  format!("{}:", endpoint)
}

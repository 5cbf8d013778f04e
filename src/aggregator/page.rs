//! Decoding one page of an upstream paginated response.
//!
//! Two shapes are accepted:
//!
//! ```text
//! { "success": true,
//!   "data": { "data": [..], "pagination": { "hasNext": true, "totalPages": 4, "total": 180 } } }
//! { "items": [..], "hasMore": true, "total": 180 }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

/// An item that can be recognised when it shows up on more than one page.
pub trait PageItem {
  /// Stable identity of the item, or `None` to never de-duplicate it.
  fn dedup_key(&self) -> Option<String> {
    None
  }
}

impl PageItem for Value {
  fn dedup_key(&self) -> Option<String> {
    self.get("id").map(|id| match id {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    })
  }
}

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub has_next: bool,
  pub total_pages: Option<u32>,
  pub total_items: Option<u64>,
  /// Items dropped because they did not decode
  pub skipped: usize,
}

/// Decode page `page` of a run using `page_size`.
///
/// When the upstream gives no explicit "has next" flag, the page count is
/// consulted, and failing that a full page is taken to mean more may follow.
pub fn parse_page<T: DeserializeOwned>(
  body: &Value,
  page: u32,
  page_size: u32,
) -> Result<Page<T>, String> {
  if body.get("success").and_then(Value::as_bool) == Some(false) {
    let message = body
      .get("error")
      .or_else(|| body.get("message"))
      .and_then(Value::as_str)
      .unwrap_or("upstream reported failure");
    return Err(message.to_string());
  }

  let container = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
  let raw_items = ["data", "items", "orders"]
    .iter()
    .find_map(|field| container.get(*field).and_then(Value::as_array))
    .ok_or_else(|| "response has no items array".to_string())?;
  let meta = container.get("pagination").unwrap_or(container);

  let total_pages = meta
    .get("totalPages")
    .and_then(Value::as_u64)
    .and_then(|n| u32::try_from(n).ok());
  let total_items = meta
    .get("total")
    .or_else(|| meta.get("totalCount"))
    .and_then(Value::as_u64);

  let explicit = meta
    .get("hasNext")
    .or_else(|| meta.get("hasMore"))
    .and_then(Value::as_bool);
  let has_next = match (explicit, total_pages) {
    (Some(flag), _) => flag,
    (None, Some(total)) => page < total,
    (None, None) => !raw_items.is_empty() && raw_items.len() >= page_size as usize,
  };

  let mut items = Vec::with_capacity(raw_items.len());
  let mut skipped = 0;
  for raw in raw_items {
    match T::deserialize(raw) {
      Ok(item) => items.push(item),
      Err(e) => {
        skipped += 1;
        tracing::debug!(page, error = %e, "skipping undecodable item");
      }
    }
  }

  if skipped > 0 {
    tracing::warn!(page, skipped, "Some items on page could not be decoded");
  }

  Ok(Page {
    items,
    has_next,
    total_pages,
    total_items,
    skipped,
  })
}

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Params;

/// An order as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: String,
  pub order_no: String,
  pub customer: Customer,
  pub order_date: String,
  pub status: String,
  pub channel: String,
  pub business_unit: String,
  pub order_type: String,
  pub lines: Vec<OrderLine>,
  pub total_amount: f64,
  pub payment: Payment,
  pub sla: Sla,
  pub priority: Option<String>,
  pub store_name: Option<String>,
}

impl Order {
  pub fn item_count(&self) -> u32 {
    self.lines.iter().map(|line| line.quantity).sum()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
  pub id: String,
  pub name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
  pub product_id: String,
  pub product_name: String,
  pub sku: Option<String>,
  pub quantity: u32,
  pub unit_price: f64,
  pub total_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub method: String,
  pub status: String,
}

/// Service-level agreement state of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
  pub target_minutes: u32,
  pub elapsed_minutes: u32,
  pub status: String,
}

impl Sla {
  pub fn is_breached(&self) -> bool {
    self.elapsed_minutes > self.target_minutes
  }
}

/// Filters for an order listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
  pub date_from: Option<NaiveDate>,
  pub date_to: Option<NaiveDate>,
  pub status: Option<String>,
  pub channel: Option<String>,
  pub business_unit: Option<String>,
}

impl OrderQuery {
  /// Orders from yesterday through today (UTC).
  pub fn last_day() -> Self {
    let today = Utc::now().date_naive();
    Self {
      date_from: Some(today - Duration::days(1)),
      date_to: Some(today),
      ..Self::default()
    }
  }

  pub fn with_status(mut self, status: impl Into<String>) -> Self {
    self.status = Some(status.into());
    self
  }

  pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
    self.channel = Some(channel.into());
    self
  }

  /// Whether an order dated `order_date` falls inside the date window.
  ///
  /// Only the calendar date is compared. With no bounds every order matches;
  /// with a bound, an order whose date cannot be read does not.
  pub fn contains_date(&self, order_date: &str) -> bool {
    if self.date_from.is_none() && self.date_to.is_none() {
      return true;
    }
    let Some(day) = calendar_day(order_date) else {
      return false;
    };
    self.date_from.map_or(true, |from| day >= from) && self.date_to.map_or(true, |to| day <= to)
  }

  /// Upstream filter parameters; also the cache identity of the listing.
  pub fn params(&self) -> Params {
    Params::new()
      .with_opt("startDate", self.date_from.map(|d| d.to_string()))
      .with_opt("endDate", self.date_to.map(|d| d.to_string()))
      .with_opt("status", self.status.as_deref())
      .with_opt("channel", self.channel.as_deref())
      .with_opt("businessUnit", self.business_unit.as_deref())
  }
}

/// Leading `YYYY-MM-DD` of a date or timestamp.
fn calendar_day(raw: &str) -> Option<NaiveDate> {
  raw
    .get(..10)
    .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

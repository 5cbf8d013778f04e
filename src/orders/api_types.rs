//! Serde-deserializable types matching the upstream order API.
//!
//! Kept apart from the domain types so upstream quirks (missing blocks,
//! nullable strings) stay out of the rest of the application.

use serde::Deserialize;

use super::types::{Customer, Order, OrderLine, Payment, Sla};
use crate::aggregator::PageItem;

#[derive(Debug, Deserialize)]
pub struct ApiOrder {
  pub id: String,
  #[serde(default)]
  pub order_no: String,
  #[serde(default)]
  pub customer: ApiCustomer,
  #[serde(default)]
  pub order_date: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub channel: String,
  #[serde(default)]
  pub business_unit: String,
  #[serde(default)]
  pub order_type: String,
  #[serde(default)]
  pub items: Vec<ApiOrderItem>,
  #[serde(default)]
  pub total_amount: f64,
  #[serde(default)]
  pub payment_info: ApiPaymentInfo,
  #[serde(default)]
  pub sla_info: ApiSlaInfo,
  #[serde(default)]
  pub metadata: ApiMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiCustomer {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOrderItem {
  #[serde(default)]
  pub product_id: String,
  #[serde(default)]
  pub product_name: String,
  pub product_sku: Option<String>,
  #[serde(default)]
  pub quantity: u32,
  #[serde(default)]
  pub unit_price: f64,
  #[serde(default)]
  pub total_price: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiPaymentInfo {
  #[serde(default)]
  pub method: String,
  #[serde(default)]
  pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiSlaInfo {
  #[serde(default)]
  pub target_minutes: u32,
  #[serde(default)]
  pub elapsed_minutes: u32,
  #[serde(default)]
  pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiMetadata {
  pub priority: Option<String>,
  pub store_name: Option<String>,
}

/// Single-order endpoint response, with or without the `{success, data}`
/// envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiOrderResponse {
  Wrapped { data: ApiOrder },
  Bare(ApiOrder),
}

impl ApiOrderResponse {
  pub fn into_order(self) -> Order {
    match self {
      ApiOrderResponse::Wrapped { data } | ApiOrderResponse::Bare(data) => data.into_order(),
    }
  }
}

impl PageItem for ApiOrder {
  fn dedup_key(&self) -> Option<String> {
    Some(self.id.clone())
  }
}

impl ApiOrder {
  pub fn into_order(self) -> Order {
    Order {
      id: self.id,
      order_no: self.order_no,
      customer: Customer {
        id: self.customer.id,
        name: self.customer.name,
        email: self.customer.email.filter(|s| !s.is_empty()),
        phone: self.customer.phone.filter(|s| !s.is_empty()),
      },
      order_date: self.order_date,
      status: self.status,
      channel: self.channel,
      business_unit: self.business_unit,
      order_type: self.order_type,
      lines: self
        .items
        .into_iter()
        .map(|item| OrderLine {
          product_id: item.product_id,
          product_name: item.product_name,
          sku: item.product_sku,
          quantity: item.quantity,
          unit_price: item.unit_price,
          total_price: item.total_price,
        })
        .collect(),
      total_amount: self.total_amount,
      payment: Payment {
        method: self.payment_info.method,
        status: self.payment_info.status,
      },
      sla: Sla {
        target_minutes: self.sla_info.target_minutes,
        elapsed_minutes: self.sla_info.elapsed_minutes,
        status: self.sla_info.status,
      },
      priority: self.metadata.priority,
      store_name: self.metadata.store_name,
    }
  }
}

//! Orders: domain types, upstream API types and the dashboard data service.

mod api_types;
mod service;
mod types;

pub use api_types::{ApiOrder, ApiOrderResponse};
pub use service::{DataSource, OrdersResult, OrdersService};
pub use types::{Customer, Order, OrderLine, OrderQuery, Payment, Sla};

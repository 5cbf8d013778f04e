//! Data layer of the order dashboard: a two-tier cache, a request
//! coordinator and a paginated aggregator, composed by [`orders::OrdersService`].

pub mod aggregator;
pub mod auth;
pub mod cache;
pub mod config;
pub mod event;
pub mod orders;
pub mod request;

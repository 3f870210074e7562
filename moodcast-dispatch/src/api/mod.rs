//! HTTP API handlers

pub mod dispatch;
pub mod health;

pub use dispatch::{dispatch_routes, not_found};
pub use health::health_routes;

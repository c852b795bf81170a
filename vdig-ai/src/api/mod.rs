//! HTTP API handlers for vdig-ai

pub mod catalog;
pub mod health;
pub mod tasks;

pub use catalog::catalog_routes;
pub use health::health_routes;
pub use tasks::task_routes;

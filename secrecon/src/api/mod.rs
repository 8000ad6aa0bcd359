//! HTTP API handlers for secrecon

pub mod health;
pub mod runs;

pub use health::health_routes;
pub use runs::run_routes;

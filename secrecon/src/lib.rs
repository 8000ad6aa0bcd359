//! secrecon library - security-master reconciliation service
//!
//! Adapters around the `secrecon-common` core: SQL data sources, the results
//! store, the exception file sink, the publish adapter, the run coordinator,
//! and the HTTP control surface.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod service;
pub mod sink;
pub mod sources;
pub mod store;

pub use error::{ApiError, ApiResult, PublishError};
pub use pipeline::{PublishOutcome, ReconPipeline, RunFailure, RunOptions, RunResult, RunStage};
pub use service::ReconService;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReconService>,
}

impl AppState {
    pub fn new(service: Arc<ReconService>) -> Self {
        Self { service }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::run_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

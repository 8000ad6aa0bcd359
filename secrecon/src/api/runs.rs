//! Run API handlers
//!
//! POST /runs/, GET /run-ids/, GET /runs/:run_id/artifact

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::pipeline::{PublishOutcome, RunOptions, RunStage};
use crate::store::ArtifactRecord;
use crate::AppState;

/// POST /runs/ request
#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    /// YYYY-MM-DD
    pub as_of_date: String,
}

/// POST /runs/ response
#[derive(Debug, Serialize)]
pub struct TriggerRunResponse {
    pub run_id: String,
    pub as_of_date: NaiveDate,
    pub status: RunStage,
    pub exception_count: usize,
    pub publish: PublishOutcome,
}

/// GET /run-ids/ query
#[derive(Debug, Deserialize)]
pub struct RunIdsQuery {
    pub as_of_date: String,
}

/// GET /run-ids/ response
#[derive(Debug, Serialize)]
pub struct RunIdsResponse {
    pub as_of_date: NaiveDate,
    pub run_ids: Vec<String>,
}

fn parse_date(raw: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("as_of_date must be YYYY-MM-DD, got '{}'", raw)))
}

/// POST /runs/
///
/// Runs the full pipeline for the date and responds once it finishes.
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(request): Json<TriggerRunRequest>,
) -> ApiResult<Json<TriggerRunResponse>> {
    let as_of_date = parse_date(&request.as_of_date)?;
    let result = state.service.trigger_run(as_of_date, RunOptions::default()).await?;

    Ok(Json(TriggerRunResponse {
        run_id: result.run_id,
        as_of_date: result.as_of_date,
        status: result.status,
        exception_count: result.exception_count,
        publish: result.publish,
    }))
}

/// GET /run-ids/?as_of_date=YYYY-MM-DD
pub async fn list_run_ids(
    State(state): State<AppState>,
    Query(query): Query<RunIdsQuery>,
) -> ApiResult<Json<RunIdsResponse>> {
    let as_of_date = parse_date(&query.as_of_date)?;
    let run_ids = state.service.list_run_ids(as_of_date).await?;
    Ok(Json(RunIdsResponse { as_of_date, run_ids }))
}

/// GET /runs/:run_id/artifact
///
/// 404 when nothing was published for the run.
pub async fn latest_artifact(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ArtifactRecord>> {
    state
        .service
        .latest_artifact(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No published artifact for run {}", run_id)))
}

/// Build run routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs/", post(trigger_run))
        .route("/run-ids/", get(list_run_ids))
        .route("/runs/:run_id/artifact", get(latest_artifact))
}

// Experiment routes: POST /v1/experiments (202 Accepted), GET
// /v1/experiments/{name}/status, GET /v1/experiments/{name}.
// `clinflow_worker::Scheduler::submit` runs its precondition checks
// synchronously and returns before the background fan-out completes.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use clinflow_core::workflow::Workflow;
use clinflow_storage::{ExperimentMetadata, ExperimentResults, ExperimentStatus};
use clinflow_worker::ExperimentRequest;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExpectedStepCount {
    pub tool: String,
    pub count: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitExperimentRequest {
    pub name: String,
    pub project_name: String,
    pub workflow_name: String,
    pub dataset_name: String,
    pub workflow: Workflow,
    #[serde(default)]
    pub mrns: Option<Vec<i64>>,
    #[serde(default)]
    pub expected_step_count: Option<ExpectedStepCount>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitExperimentResponse {
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExperimentView {
    pub metadata: ExperimentMetadata,
    pub status: ExperimentStatus,
    pub results: ExperimentResults,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/experiments", post(submit_experiment))
        .route("/v1/experiments/{name}/status", get(experiment_status))
        .route("/v1/experiments/{name}", get(experiment_view))
        .with_state(state)
}

/// POST /v1/experiments
#[utoipa::path(
    post,
    path = "/v1/experiments",
    request_body = SubmitExperimentRequest,
    responses((status = 202, description = "Experiment accepted and running in the background", body = SubmitExperimentResponse)),
    tag = "experiments",
)]
pub async fn submit_experiment(
    State(state): State<AppState>,
    Json(req): Json<SubmitExperimentRequest>,
) -> Result<(StatusCode, HeaderMap, Json<SubmitExperimentResponse>), ApiError> {
    if !state.auth.can_access_dataset(&req.dataset_name) {
        return Err(ApiError::AccessDenied(req.dataset_name));
    }

    let name = req.name.clone();
    let handle = state
        .scheduler
        .submit(ExperimentRequest {
            name: req.name,
            project_name: req.project_name,
            workflow_name: req.workflow_name,
            dataset_name: req.dataset_name,
            workflow: req.workflow,
            mrns: req.mrns,
            expected_step_count: req.expected_step_count.map(|e| (e.tool, e.count)),
        })
        .await?;

    let mut headers = HeaderMap::new();
    let location = format!("/v1/experiments/{name}/status");
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert(axum::http::header::LOCATION, value);
    }

    Ok((StatusCode::ACCEPTED, headers, Json(SubmitExperimentResponse { name: handle.name })))
}

/// GET /v1/experiments/{name}/status
#[utoipa::path(
    get,
    path = "/v1/experiments/{name}/status",
    params(("name" = String, Path, description = "Experiment name")),
    responses((status = 200, description = "Current lifecycle and progress", body = ExperimentStatus)),
    tag = "experiments",
)]
pub async fn experiment_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ExperimentStatus>, ApiError> {
    if !state.store.experiments.exists(&name).await {
        return Err(ApiError::NotFound(format!("experiment {name:?}")));
    }
    Ok(Json(state.store.experiments.status(&name).await?))
}

/// GET /v1/experiments/{name}
#[utoipa::path(
    get,
    path = "/v1/experiments/{name}",
    params(("name" = String, Path, description = "Experiment name")),
    responses((status = 200, description = "Metadata, status, and accumulated results", body = ExperimentView)),
    tag = "experiments",
)]
pub async fn experiment_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ExperimentView>, ApiError> {
    if !state.store.experiments.exists(&name).await {
        return Err(ApiError::NotFound(format!("experiment {name:?}")));
    }
    let metadata = state.store.experiments.metadata(&name).await?;
    let status = state.store.experiments.status(&name).await?;
    let results = state.store.experiments.results(&name).await?;
    Ok(Json(ExperimentView { metadata, status, results }))
}

// A single error type translating every fallible dependency (on-disk
// stores, the workflow engine core, the scheduler) into an HTTP response.
// One `IntoResponse` impl here since every route in this surface needs
// the same mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] clinflow_storage::StoreError),
    #[error(transparent)]
    Core(#[from] clinflow_core::error::CoreError),
    #[error(transparent)]
    Scheduler(#[from] clinflow_worker::SchedulerError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("access to {0:?} is denied")]
    AccessDenied(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::Scheduler(clinflow_worker::SchedulerError::NameInUse(_)) => StatusCode::CONFLICT,
            ApiError::Scheduler(clinflow_worker::SchedulerError::DatasetNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(clinflow_worker::SchedulerError::DatasetEmpty(_))
            | ApiError::Scheduler(clinflow_worker::SchedulerError::UnexpectedWorkflowShape { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(_) | ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::{stage::StageError, workspace::WorkspaceError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Workspace(WorkspaceError::InvalidFileName(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Workspace(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Stage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(format!("execution task failed: {value}"))
    }
}

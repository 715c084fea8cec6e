//! HTTP error mapping

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sieve_core::{CoreError, TransportFailure};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Upstream request failed: {0}")]
    Upstream(TransportFailure),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Report not ready: {0}")]
    NotReady(String),
}

impl From<TransportFailure> for ApiError {
    fn from(failure: TransportFailure) -> Self {
        ApiError::Upstream(failure)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Core(CoreError::InvalidIdentifier(_)) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(CoreError::Transport(_)) | ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Core(CoreError::SummarizationUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Provider status code, when the failure came from the provider
    fn upstream_status(&self) -> Option<u16> {
        match self {
            ApiError::Upstream(failure) | ApiError::Core(CoreError::Transport(failure)) => failure.status,
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        // Internal details stay in the log
        let message = match &self {
            ApiError::Core(CoreError::Database(_)) => "Database error".to_string(),
            _ => self.to_string(),
        };

        let body = ErrorBody {
            error: message,
            status: self.upstream_status(),
        };
        (status, Json(body)).into_response()
    }
}

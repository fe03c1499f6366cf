use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jukebox_collab::CommandError;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Request body is invalid: {0}")]
    InvalidBody(String),
}

/// The body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// A stable, machine readable reason
    reason: String,
    message: String,
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Command(e) => match e {
                CommandError::NotFound { .. } => StatusCode::NOT_FOUND,
                CommandError::InvalidTransition { .. } | CommandError::QueueEmpty => {
                    StatusCode::CONFLICT
                }
                CommandError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                CommandError::StorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
                CommandError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
                CommandError::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "invalid-body",
            Self::Command(e) => e.reason(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            reason: self.reason().to_string(),
            message: self.to_string(),
        };

        (self.as_status_code(), Json(body)).into_response()
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use ballot_types::api::ErrorResponse;
use ballot_types::models::DraftError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("option '{0}' is not part of this poll")]
    InvalidOption(String),

    #[error("sign in required")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("you have already voted on this poll")]
    AlreadyVoted,

    #[error("username is already taken")]
    UsernameTaken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::InvalidOption(_) => (StatusCode::BAD_REQUEST, "INVALID_OPTION"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::AlreadyVoted => (StatusCode::CONFLICT, "ALREADY_VOTED"),
            Self::UsernameTaken => (StatusCode::CONFLICT, "USERNAME_TAKEN"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<DraftError> for ApiError {
    fn from(err: DraftError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use aidconnect_shared::ValidationError;
use aidconnect_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(err: ValidationError) -> Self {
        ServerError::Validation(err.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            StoreError::Validation(e) => ServerError::Validation(e.to_string()),
            StoreError::DuplicateKey(key) => ServerError::Conflict(key),
            other => {
                tracing::error!(error = %other, "store failure");
                ServerError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

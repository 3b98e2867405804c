use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forge_engine::EngineError;
use forge_store::StoreError;

/// Errors returned from the JSON endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::NotFound(_))
            | Self::Engine(EngineError::Store(StoreError::NotFound(_)))
            | Self::Engine(EngineError::SessionNotFound(_))
            | Self::Engine(EngineError::NothingToReplay(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::InvalidName(_) | StoreError::InvalidSession(_)) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

//! Error handling for the gateway.
//!
//! Every handler returns `Result<_, GatewayError>`; `status()` is the single
//! place where an error kind becomes an HTTP status. The body is always
//! `{"detail": "<message>"}`, carrying GLPI's own message when there is one.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use glpi_core::ApiError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// GLPI answered, but not with success (or the answer was unreadable).
    #[error(transparent)]
    Remote(#[from] ApiError),

    /// GLPI could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// GLPI did not answer within the configured timeout.
    #[error("request to GLPI timed out")]
    Timeout,

    /// The inbound request was malformed.
    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Remote(ApiError::NotFound { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Remote(ApiError::InvalidInput(_)) | GatewayError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for GatewayError {
    fn from(rejection: PathRejection) -> Self {
        GatewayError::Validation(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!(http.status = %status, error = %detail, "request failed");
        } else {
            tracing::warn!(http.status = %status, error = %detail, "request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

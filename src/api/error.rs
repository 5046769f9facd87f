//! HTTP mapping of gateway errors

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Error;

/// Error body, shaped like the not-found responses clients already expect
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub error: &'static str,
    pub status_code: u16,
}

/// Build an error response with the standard body
#[must_use]
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        message: message.into(),
        error: status.canonical_reason().unwrap_or("Error"),
        status_code: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Self::RouteNotFound { method, path } => error_response(
                StatusCode::NOT_FOUND,
                format!("Route {method}:{path} not found"),
            ),
            Self::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, message),
            // Plugin failures were logged by the dispatcher
            Self::Handler(_) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
            other => {
                tracing::error!(error = %other, "request failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

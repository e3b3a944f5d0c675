//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use lifeline_core::Error;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// 400 with the offending field when known.
    BadRequest {
        field: Option<String>,
        message: String,
    },
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    GatewayTimeout(String),
    Internal(Error),
}

impl ApiError {
    pub fn bad_request(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { field, message } => ApiError::BadRequest {
                field: Some(field),
                message,
            },
            Error::InvalidTransition(msg) => ApiError::BadRequest {
                field: None,
                message: msg,
            },
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::EventNotFound(id) => ApiError::NotFound(format!("SOS event {} not found", id)),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            Error::Timeout(msg) => ApiError::GatewayTimeout(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::BadRequest { field, message } => match field {
                Some(field) => serde_json::json!({ "error": message, "field": field }),
                None => serde_json::json!({ "error": message }),
            },
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::GatewayTimeout(msg) => serde_json::json!({ "error": msg }),
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                serde_json::json!({ "error": "internal server error" })
            }
        };

        (status, Json(body)).into_response()
    }
}

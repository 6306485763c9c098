use crate::access::VerifierError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reauthenticate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

/// Application error types for HTTP endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// No dashboard session
    Unauthorized(String),
    /// Session exists but Discord credentials are missing or dead
    Reauthenticate(String),
    RateLimited { retry_after_seconds: u64 },
    ServerError(String),
    BadGateway {
        message: String,
        upstream_status: Option<u16>,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut reauthenticate = false;
        let mut upstream = None;
        let mut retry_after = None;

        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Reauthenticate(msg) => {
                reauthenticate = true;
                (StatusCode::UNAUTHORIZED, msg)
            }
            AppError::RateLimited {
                retry_after_seconds,
            } => {
                retry_after = Some(retry_after_seconds);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many requests. Please try again later.".to_string(),
                )
            }
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway {
                message,
                upstream_status,
            } => {
                upstream = upstream_status;
                (StatusCode::BAD_GATEWAY, message)
            }
        };

        let body = Json(ErrorResponse {
            error,
            reauthenticate,
            upstream_status: upstream,
        });
        let mut response = (status, body).into_response();

        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<VerifierError> for AppError {
    fn from(err: VerifierError) -> Self {
        match err {
            VerifierError::NoToken | VerifierError::SessionExpired => {
                AppError::Reauthenticate(err.to_string())
            }
            VerifierError::Upstream { status } => AppError::BadGateway {
                message: "Discord API error".to_string(),
                upstream_status: Some(status),
            },
            VerifierError::InvalidResponse { .. } => AppError::BadGateway {
                message: "Discord API returned an unreadable response".to_string(),
                upstream_status: None,
            },
            VerifierError::Transport(_) => AppError::BadGateway {
                message: "Discord API unreachable".to_string(),
                upstream_status: None,
            },
            VerifierError::Storage(_) => {
                AppError::ServerError("Failed to read stored credentials".to_string())
            }
        }
    }
}

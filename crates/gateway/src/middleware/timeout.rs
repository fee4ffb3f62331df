//! Request timeout responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use coursedesk_common::errors::AppError;

/// Replace the empty 408 produced by the timeout layer with the error envelope
pub async fn timeout_envelope(response: Response) -> Response {
    if response.status() != StatusCode::REQUEST_TIMEOUT {
        return response;
    }

    tracing::warn!("Request exceeded the server timeout");
    AppError::BackendUnavailable {
        message: "request timeout elapsed".to_string(),
    }
    .into_response()
}

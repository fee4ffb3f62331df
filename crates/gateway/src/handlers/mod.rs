//! API handlers module

pub mod auth;
pub mod catalog;
pub mod enrollments;
pub mod health;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use coursedesk_common::errors::{AppError, Result};

/// Turn a body rejection into a 400 with the usual error envelope
pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected request body");
            Err(AppError::Validation {
                message: "El cuerpo de la solicitud no es JSON válido".to_string(),
                field: None,
            })
        }
    }
}

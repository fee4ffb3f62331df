//! Login passthrough guarded by the server-side lockout

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::handlers::json_body;
use crate::AppState;
use coursedesk_common::{
    backend::{Credentials, LoginOutcome},
    errors::{AppError, Result},
    metrics,
};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(rename = "usuario", alias = "email", alias = "username", default)]
    #[validate(length(min = 1, max = 254))]
    pub account: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub data: serde_json::Value,
}

const INVALID_CREDENTIALS: &str = "Usuario o contraseña incorrectos";

/// Forward a login attempt, counting failures per account
pub async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let request = json_body(payload)?;
    request.validate().map_err(|_| AppError::Validation {
        message: "Usuario y contraseña son obligatorios".to_string(),
        field: None,
    })?;
    let account = request.account.trim().to_string();

    // A lockout store outage must not block logins
    match state.throttle.check(&account).await {
        Ok(()) => {}
        Err(locked @ AppError::AccountLocked { .. }) => return Err(locked),
        Err(e) => tracing::warn!(error = %e, "Lockout check failed; allowing attempt"),
    }

    let credentials = Credentials {
        account: account.clone(),
        password: request.password,
    };

    match state.backend.login(&credentials).await? {
        LoginOutcome::Accepted(session) => {
            metrics::record_login("accepted");
            if let Err(e) = state.throttle.register_success(&account).await {
                tracing::warn!(error = %e, "Failed to reset lockout counter");
            }
            Ok(Json(LoginResponse {
                success: true,
                data: session,
            }))
        }
        LoginOutcome::Rejected => {
            metrics::record_login("rejected");
            match state.throttle.register_failure(&account).await {
                Ok(remaining) => Err(AppError::Unauthorized {
                    message: format!("{}. Intentos restantes: {}", INVALID_CREDENTIALS, remaining),
                }),
                Err(locked @ AppError::AccountLocked { .. }) => Err(locked),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to count login failure");
                    Err(AppError::Unauthorized {
                        message: INVALID_CREDENTIALS.to_string(),
                    })
                }
            }
        }
    }
}

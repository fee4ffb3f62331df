//! Error types for CourseDesk services
//!
//! Provides:
//! - Distinct error types for validation, business-rule and upstream failures
//! - HTTP status code mapping
//! - The `{success: false, error, code}` response envelope used by the UI

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Message shown to users when an upstream dependency fails
pub const UPSTREAM_UNAVAILABLE_MESSAGE: &str =
    "El servicio de datos no está disponible en este momento, intente más tarde";

/// Message shown to users for unexpected failures
pub const INTERNAL_ERROR_MESSAGE: &str = "Ocurrió un error inesperado al procesar la solicitud";

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,
    AccountLocked,

    // Resource errors (4xxx)
    NotFound,
    CourseNotFound,
    StudentNotFound,

    // Conflict errors (5xxx)
    AlreadyEnrolled,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    BackendUnavailable,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::AccountLocked => 2002,

            ErrorCode::NotFound => 4001,
            ErrorCode::CourseNotFound => 4002,
            ErrorCode::StudentNotFound => 4003,

            ErrorCode::AlreadyEnrolled => 5001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::BackendUnavailable => 8003,
            ErrorCode::CacheError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
///
/// Client-facing variants carry the Spanish message the UI renders verbatim.
/// Server-side variants carry the cause for logs only.
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("El campo {field} es obligatorio")]
    MissingField { field: String },

    #[error("Formato inválido: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("{message}")]
    Unauthorized { message: String },

    #[error("Cuenta bloqueada temporalmente, intente de nuevo en {retry_after_secs} segundos")]
    AccountLocked { retry_after_secs: u64 },

    // Resource errors
    #[error("No se encontró {resource_type} {id}")]
    NotFound { resource_type: String, id: String },

    #[error("El curso seleccionado no existe")]
    CourseNotFound { course_id: i64 },

    #[error("El alumno no existe")]
    StudentNotFound { curp: String },

    // Business-rule conflicts
    #[error("El alumno ya está inscrito en este curso")]
    AlreadyEnrolled { curp: String, course_id: i64 },

    // Rate limiting
    #[error("Demasiadas solicitudes, intente más tarde")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Upstream {service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("Upstream {service} timed out after {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::AccountLocked { .. } => ErrorCode::AccountLocked,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::CourseNotFound { .. } => ErrorCode::CourseNotFound,
            AppError::StudentNotFound { .. } => ErrorCode::StudentNotFound,
            AppError::AlreadyEnrolled { .. } => ErrorCode::AlreadyEnrolled,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request; already-enrolled keeps the status the UI expects
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::AlreadyEnrolled { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::CourseNotFound { .. }
            | AppError::StudentNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::AccountLocked { .. } | AppError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Upstream { .. }
            | AppError::UpstreamTimeout { .. }
            | AppError::BackendUnavailable { .. }
            | AppError::CacheError { .. }
            | AppError::HttpClient(_)
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Whether the failure means a dependency could not be reached in time,
    /// as opposed to the dependency answering with an error.
    pub fn is_unavailable(&self) -> bool {
        match self {
            AppError::Database(err) => {
                matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
            }
            AppError::HttpClient(err) => err.is_timeout() || err.is_connect(),
            AppError::DatabaseConnection { .. }
            | AppError::UpstreamTimeout { .. }
            | AppError::BackendUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Message safe to show to the end user
    pub fn public_message(&self) -> String {
        if !self.is_server_error() {
            return self.to_string();
        }
        match self {
            AppError::Configuration { .. }
            | AppError::Internal { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            _ => UPSTREAM_UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::MissingField { field } => Some(serde_json::json!({ "field": field })),
            AppError::Validation { field: Some(field), .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            AppError::AccountLocked { retry_after_secs } => {
                Some(serde_json::json!({ "retryAfterSecs": retry_after_secs }))
            }
            AppError::AlreadyEnrolled { curp, course_id } => {
                Some(serde_json::json!({ "curp": curp, "cursoId": course_id }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity; the cause never reaches the response body
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            success: false,
            error: self.public_message(),
            code,
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::BackendUnavailable {
            message: "operation timed out".to_string(),
        }
    }
}

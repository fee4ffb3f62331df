//! CourseDesk Common Library
//!
//! Shared code for the CourseDesk gateway:
//! - Enrollment reconciliation workflow
//! - Backend gateway client and response normalization
//! - Relational store access and migrations
//! - Login lockout
//! - Error types, configuration and metrics

pub mod backend;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod errors;
pub mod lockout;
pub mod metrics;

// Re-export commonly used types
pub use backend::{BackendApi, BackendClient};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use enrollment::{EnrollmentReconciler, EnrollmentStore};
pub use errors::{AppError, Result};
pub use lockout::LoginThrottle;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Relational store access
//!
//! Connection management, the enrollment entity and the repository that
//! implements [`EnrollmentStore`](crate::enrollment::EnrollmentStore).

pub mod models;
mod repository;

pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Table holding one row per (student, course) enrollment
pub const ENROLLMENT_TABLE: &str = "inscripciones";

/// Database connection pool wrapper
pub struct DbPool {
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Connect using the pool settings from configuration
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to enrollment database...");

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");
        Ok(Self { primary })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::Configuration {
                message: format!("Migration failed: {}", e),
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

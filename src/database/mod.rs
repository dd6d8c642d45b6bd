//! Database connection and management
//!
//! Connection pooling and the service modules that talk to the store. Each
//! service holds its own `PgPool` clone and issues runtime-checked queries.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DatabaseConfig;

pub mod audit_service;
pub mod integrity_service;
pub mod quarantine_service;
pub mod quarantine_tenant;

pub use audit_service::AuditService;
pub use integrity_service::IntegrityService;
pub use quarantine_service::QuarantineService;
pub use quarantine_tenant::QuarantineTenantResolver;

/// Database connection manager
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// Create a new connection pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&config.database_url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "database connection pool established"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        let row = sqlx::query("SELECT 1 AS one").fetch_one(&self.pool).await?;
        let _: i32 = row.try_get("one")?;
        Ok(())
    }
}

//! Audit recorder
//!
//! Appends immutable, tenant-scoped audit events. Events are written on
//! success only (a refused or failed action leaves no trace here) and are
//! never updated or deleted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

/// A recorded audit event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub event_type: String,
    pub message: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Service for appending and browsing audit events
#[derive(Clone, Debug)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit event under the given tenant.
    pub async fn record(
        &self,
        tenant_id: Uuid,
        actor_user_id: Option<Uuid>,
        event_type: &str,
        message: &str,
        metadata: JsonValue,
    ) -> Result<Uuid> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for audit event")?;
        self.record_in(&mut conn, tenant_id, actor_user_id, event_type, message, metadata)
            .await
    }

    /// Append one audit event on the caller's connection. Callers that
    /// mutate and audit in one unit pass their open transaction here, so
    /// the event commits atomically with the mutation it describes.
    pub async fn record_in(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
        actor_user_id: Option<Uuid>,
        event_type: &str,
        message: &str,
        metadata: JsonValue,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, tenant_id, actor_user_id, event_type, message, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(actor_user_id)
        .bind(event_type)
        .bind(message)
        .bind(metadata)
        .execute(&mut *conn)
        .await
        .context("Failed to record audit event")?;

        info!(
            event_id = %id,
            tenant_id = %tenant_id,
            event_type,
            "recorded audit event"
        );

        Ok(id)
    }

    /// Most recent events across tenants, for the admin surface.
    pub async fn recent(&self, limit: Option<i64>) -> Result<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, tenant_id, actor_user_id, event_type, message, metadata, created_at
            FROM audit_events
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.unwrap_or(50))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent audit events")?;

        Ok(events)
    }
}

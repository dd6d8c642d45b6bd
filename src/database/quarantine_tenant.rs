//! Quarantine tenant resolver
//!
//! The quarantine tenant is a reserved, inactive sentinel row located by its
//! slug, never by id, so it survives deletion and re-creation. The resolver
//! splits lookup from creation: dry-run paths call `resolve_if_exists` and
//! can never trigger creation as a side effect; apply paths call
//! `resolve_or_create` at the moment the first unresolvable row appears.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Slug of the reserved sentinel tenant.
pub const QUARANTINE_TENANT_SLUG: &str = "quarantine";

#[derive(Clone, Debug)]
pub struct QuarantineTenantResolver {
    pool: PgPool,
}

impl QuarantineTenantResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up the quarantine tenant without ever creating it.
    pub async fn resolve_if_exists(&self) -> Result<Option<Uuid>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM tenants WHERE slug = $1")
                .bind(QUARANTINE_TENANT_SLUG)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up quarantine tenant")?;
        Ok(id)
    }

    /// Find the quarantine tenant, creating it (inactive, with its sentinel
    /// primary workspace) on first need. Returns the id and whether this
    /// call created it. Safe under concurrent callers: the insert is
    /// `ON CONFLICT DO NOTHING` keyed on the unique slug, and the loser of
    /// the race re-reads the winner's row.
    pub async fn resolve_or_create(&self) -> Result<(Uuid, bool)> {
        if let Some(id) = self.resolve_if_exists().await? {
            return Ok((id, false));
        }

        let candidate = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO tenants (id, name, slug, status)
            VALUES ($1, 'Quarantine', $2, 'inactive')
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(candidate)
        .bind(QUARANTINE_TENANT_SLUG)
        .execute(&self.pool)
        .await
        .context("Failed to create quarantine tenant")?;

        let id = if inserted.rows_affected() == 1 {
            candidate
        } else {
            self.resolve_if_exists()
                .await?
                .context("quarantine tenant vanished after conflicting insert")?
        };
        let created = inserted.rows_affected() == 1;

        if created {
            self.ensure_sentinel_workspace(id).await?;
            info!(tenant_id = %id, "created quarantine tenant");
        }

        Ok((id, created))
    }

    /// The sentinel workspace keeps the quarantine tenant consistent with
    /// the one-primary-workspace-per-tenant invariant.
    async fn ensure_sentinel_workspace(&self, tenant_id: Uuid) -> Result<()> {
        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM workspaces WHERE tenant_id = $1 LIMIT 1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up quarantine workspace")?;

        if existing.is_none() {
            sqlx::query(
                "INSERT INTO workspaces (id, tenant_id, is_primary) VALUES ($1, $2, true)",
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .context("Failed to create quarantine workspace")?;
        }

        Ok(())
    }
}

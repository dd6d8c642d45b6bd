//! Reconciliation pass orchestrator
//!
//! Loads a pass-scoped snapshot of the store, runs the pure planner over it
//! in the fixed dependency order Project -> Task -> Team -> User, and in
//! apply mode writes each decision back as its own atomic conditional
//! UPDATE. Every selection predicate is `tenant_id IS NULL`, so a second
//! apply run over unchanged data performs zero writes, and a concurrent pass
//! simply finds nothing left to claim.
//!
//! Only `tenant_id` (plus the per-type quarantine status flag) is ever
//! mutated; relational pointers are never touched by this pass.

pub mod inference;
pub mod snapshot;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::audit_service::AuditService;
use crate::database::quarantine_tenant::QuarantineTenantResolver;
use crate::error::{EngineError, EngineResult};
use snapshot::{plan_pass, Decision, PassPlan, PassSnapshot, TypePlan};

/// Pass mode. Dry-run computes the identical plan but never writes and
/// never creates the quarantine tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    DryRun,
    Apply,
}

impl BackfillMode {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "dry_run" => Ok(BackfillMode::DryRun),
            "apply" => Ok(BackfillMode::Apply),
            other => Err(EngineError::Validation(format!(
                "invalid mode '{other}', expected dry_run or apply"
            ))),
        }
    }
}

/// Per-type slice of a backfill report.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TypeReport {
    pub total_missing: i64,
    pub inferred_count: i64,
    pub quarantined_count: i64,
    pub already_resolved_count: i64,
    /// Rows skipped because their individual write failed; the pass never
    /// aborts as a whole over one row.
    pub skipped_count: i64,
    pub sample_ambiguous_ids: Vec<Uuid>,
}

impl TypeReport {
    fn from_plan(plan: &TypePlan) -> Self {
        Self {
            total_missing: plan.total_missing,
            inferred_count: plan.inferred_count,
            quarantined_count: plan.quarantined_count,
            already_resolved_count: plan.already_resolved_count,
            skipped_count: 0,
            sample_ambiguous_ids: plan.sample_ambiguous_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub mode: BackfillMode,
    /// Nil UUID in dry-run mode: a pure analysis run never creates the
    /// sentinel tenant, so there may be no real id to report.
    pub quarantine_tenant_id: Uuid,
    pub quarantine_tenant_created: bool,
    pub projects: TypeReport,
    pub tasks: TypeReport,
    pub teams: TypeReport,
    pub users: TypeReport,
}

impl BackfillReport {
    pub fn total_writes(&self) -> i64 {
        [&self.projects, &self.tasks, &self.teams, &self.users]
            .iter()
            .map(|t| t.inferred_count + t.quarantined_count - t.skipped_count)
            .sum()
    }
}

/// Scan report: missing-tenant counts plus advisory notes for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub projects_missing: i64,
    pub tasks_missing: i64,
    pub teams_missing: i64,
    pub users_missing: i64,
    pub would_infer: i64,
    pub would_quarantine: i64,
    pub notes: Vec<String>,
}

/// Orchestrates reconciliation passes over the store.
#[derive(Clone)]
pub struct ReconciliationService {
    pool: PgPool,
}

impl ReconciliationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run one pass. In dry-run mode this is strictly read-only.
    pub async fn run(
        &self,
        mode: BackfillMode,
        actor_user_id: Option<Uuid>,
    ) -> EngineResult<BackfillReport> {
        let mut snap = self.load_snapshot().await?;
        let plan = plan_pass(&mut snap);

        info!(
            ?mode,
            projects = plan.projects.total_missing,
            tasks = plan.tasks.total_missing,
            teams = plan.teams.total_missing,
            users = plan.users.total_missing,
            "planned reconciliation pass"
        );

        match mode {
            BackfillMode::DryRun => Ok(BackfillReport {
                mode,
                quarantine_tenant_id: Uuid::nil(),
                quarantine_tenant_created: false,
                projects: TypeReport::from_plan(&plan.projects),
                tasks: TypeReport::from_plan(&plan.tasks),
                teams: TypeReport::from_plan(&plan.teams),
                users: TypeReport::from_plan(&plan.users),
            }),
            BackfillMode::Apply => self.apply(plan, actor_user_id).await,
        }
    }

    /// Dry-run pass rendered as an operator-facing scan summary.
    pub async fn scan(&self) -> EngineResult<ScanReport> {
        let report = self.run(BackfillMode::DryRun, None).await?;

        let missing = [
            ("project", report.projects.total_missing),
            ("task", report.tasks.total_missing),
            ("team", report.teams.total_missing),
            ("user", report.users.total_missing),
        ];
        let total: i64 = missing.iter().map(|(_, n)| n).sum();
        let would_infer = report.projects.inferred_count
            + report.tasks.inferred_count
            + report.teams.inferred_count
            + report.users.inferred_count;
        let would_quarantine = report.projects.quarantined_count
            + report.tasks.quarantined_count
            + report.teams.quarantined_count
            + report.users.quarantined_count;

        let mut notes = Vec::new();
        if total == 0 {
            notes.push("no rows are missing a tenant; nothing to do".to_string());
        } else {
            notes.push(format!(
                "{total} rows are missing a tenant; {would_infer} can be inferred, \
                 {would_quarantine} would be quarantined"
            ));
            notes.push(
                "run POST /api/tenantid/backfill?mode=apply to remediate (requires \
                 ALLOW_TENANT_BACKFILL_APPLY and the X-Confirm-Backfill header)"
                    .to_string(),
            );
        }
        if would_quarantine > 0 {
            notes.push(
                "quarantined rows remain visible under GET /api/quarantine/list until \
                 an operator assigns or deletes them"
                    .to_string(),
            );
        }

        Ok(ScanReport {
            projects_missing: report.projects.total_missing,
            tasks_missing: report.tasks.total_missing,
            teams_missing: report.teams.total_missing,
            users_missing: report.users.total_missing,
            would_infer,
            would_quarantine,
            notes,
        })
    }

    async fn apply(
        &self,
        plan: PassPlan,
        actor_user_id: Option<Uuid>,
    ) -> EngineResult<BackfillReport> {
        let resolver = QuarantineTenantResolver::new(self.pool.clone());
        // Created lazily, exactly once, at the first unresolvable row.
        let mut quarantine_id: Option<Uuid> = None;
        let mut quarantine_created = false;

        let mut projects = TypeReport::from_plan(&plan.projects);
        let mut tasks = TypeReport::from_plan(&plan.tasks);
        let mut teams = TypeReport::from_plan(&plan.teams);
        let mut users = TypeReport::from_plan(&plan.users);

        for (kind, type_plan, report) in [
            (EntityKind::Project, &plan.projects, &mut projects),
            (EntityKind::Task, &plan.tasks, &mut tasks),
            (EntityKind::Team, &plan.teams, &mut teams),
            (EntityKind::User, &plan.users, &mut users),
        ] {
            for row in &type_plan.decisions {
                let tenant = match row.decision {
                    Decision::Resolve(tenant) => tenant,
                    Decision::Quarantine => match quarantine_id {
                        Some(id) => id,
                        None => {
                            let (id, created) = resolver
                                .resolve_or_create()
                                .await
                                .context("resolving quarantine tenant")?;
                            quarantine_id = Some(id);
                            quarantine_created = created;
                            id
                        }
                    },
                };
                let quarantined = row.decision == Decision::Quarantine;
                if let Err(e) = self.write_row(kind, row.id, tenant, quarantined).await {
                    warn!(kind = kind.table(), row_id = %row.id, error = %e, "row write failed, skipping");
                    report.skipped_count += 1;
                }
            }
        }

        let report = BackfillReport {
            mode: BackfillMode::Apply,
            quarantine_tenant_id: quarantine_id.unwrap_or_else(Uuid::nil),
            quarantine_tenant_created: quarantine_created,
            projects,
            tasks,
            teams,
            users,
        };

        if report.total_writes() > 0 {
            // Recorded under the quarantine tenant when one exists; a pass
            // that only inferred real tenants has no single owning tenant,
            // so the nil sentinel id is used for the pass-level event.
            let audit = AuditService::new(self.pool.clone());
            audit
                .record(
                    report.quarantine_tenant_id,
                    actor_user_id,
                    "tenancy.backfill_apply",
                    "tenant id backfill pass applied",
                    json!({
                        "projects": {
                            "inferred": report.projects.inferred_count,
                            "quarantined": report.projects.quarantined_count,
                            "skipped": report.projects.skipped_count,
                        },
                        "tasks": {
                            "inferred": report.tasks.inferred_count,
                            "quarantined": report.tasks.quarantined_count,
                            "skipped": report.tasks.skipped_count,
                        },
                        "teams": {
                            "inferred": report.teams.inferred_count,
                            "quarantined": report.teams.quarantined_count,
                            "skipped": report.teams.skipped_count,
                        },
                        "users": {
                            "inferred": report.users.inferred_count,
                            "quarantined": report.users.quarantined_count,
                            "skipped": report.users.skipped_count,
                        },
                        "quarantine_tenant_created": report.quarantine_tenant_created,
                    }),
                )
                .await
                .context("recording backfill audit event")?;
        } else {
            debug!("apply pass performed no writes, no audit event recorded");
        }

        Ok(report)
    }

    /// One atomic conditional write. The `tenant_id IS NULL` predicate is
    /// what makes the pass idempotent and safe against a concurrent pass:
    /// whichever pass writes first claims the row, the other's UPDATE
    /// matches nothing.
    async fn write_row(
        &self,
        kind: EntityKind,
        id: Uuid,
        tenant: Uuid,
        quarantined: bool,
    ) -> Result<(), sqlx::Error> {
        let sql = match (kind, quarantined) {
            (EntityKind::Project, false) => {
                "UPDATE projects SET tenant_id = $1 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::Project, true) => {
                "UPDATE projects SET tenant_id = $1, status = 'archived' \
                 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::Task, false) => {
                "UPDATE tasks SET tenant_id = $1 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::Task, true) => {
                "UPDATE tasks SET tenant_id = $1, status = 'archived' \
                 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::Team, _) => {
                "UPDATE teams SET tenant_id = $1 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::User, false) => {
                "UPDATE users SET tenant_id = $1 WHERE id = $2 AND tenant_id IS NULL"
            }
            (EntityKind::User, true) => {
                "UPDATE users SET tenant_id = $1, is_active = false \
                 WHERE id = $2 AND tenant_id IS NULL"
            }
        };

        let result = sqlx::query(sql)
            .bind(tenant)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            // Claimed by a concurrent pass between our read and write.
            debug!(kind = kind.table(), row_id = %id, "row already claimed, no-op");
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> EngineResult<PassSnapshot> {
        let mut snap = PassSnapshot::default();

        snap.workspace_tenants = self
            .load_tenant_map("SELECT id, tenant_id FROM workspaces WHERE tenant_id IS NOT NULL")
            .await?;
        snap.client_tenants = self
            .load_tenant_map("SELECT id, tenant_id FROM clients WHERE tenant_id IS NOT NULL")
            .await?;
        snap.user_tenants = self
            .load_tenant_map("SELECT id, tenant_id FROM users WHERE tenant_id IS NOT NULL")
            .await?;
        snap.project_tenants = self
            .load_tenant_map("SELECT id, tenant_id FROM projects WHERE tenant_id IS NOT NULL")
            .await?;

        let rows: Vec<(Uuid, Option<Uuid>, Option<Uuid>, Option<Uuid>)> = sqlx::query_as(
            "SELECT id, workspace_id, client_id, created_by FROM projects WHERE tenant_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        snap.missing_projects = rows
            .into_iter()
            .map(|(id, workspace_id, client_id, created_by)| snapshot::MissingProject {
                id,
                workspace_id,
                client_id,
                created_by,
            })
            .collect();

        let rows: Vec<(Uuid, Option<Uuid>, Option<Uuid>)> = sqlx::query_as(
            "SELECT id, project_id, created_by FROM tasks WHERE tenant_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        snap.missing_tasks = rows
            .into_iter()
            .map(|(id, project_id, created_by)| snapshot::MissingTask {
                id,
                project_id,
                created_by,
            })
            .collect();

        let rows: Vec<(Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, workspace_id FROM teams WHERE tenant_id IS NULL")
                .fetch_all(&self.pool)
                .await?;
        snap.missing_teams = rows
            .into_iter()
            .map(|(id, workspace_id)| snapshot::MissingTeam { id, workspace_id })
            .collect();

        // Super-operators are exempt from tenant attribution entirely.
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, email FROM users WHERE tenant_id IS NULL AND role <> 'super_admin'",
        )
        .fetch_all(&self.pool)
        .await?;
        snap.missing_users = rows
            .into_iter()
            .map(|(id, email)| snapshot::MissingUser { id, email })
            .collect();

        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT wm.user_id, wm.workspace_id FROM workspace_members wm \
             JOIN users u ON u.id = wm.user_id WHERE u.tenant_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        for (user_id, workspace_id) in rows {
            snap.user_memberships.entry(user_id).or_default().push(workspace_id);
        }

        let rows: Vec<(String, Uuid)> = sqlx::query_as(
            "SELECT lower(email), tenant_id FROM invitations WHERE status = 'pending'",
        )
        .fetch_all(&self.pool)
        .await?;
        for (email, tenant_id) in rows {
            snap.pending_invites.entry(email).or_default().push(tenant_id);
        }

        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT created_by, id FROM projects WHERE created_by IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        for (user_id, project_id) in rows {
            snap.authored_projects.entry(user_id).or_default().push(project_id);
        }

        snap.resolved_counts.projects = self
            .count("SELECT COUNT(*) FROM projects WHERE tenant_id IS NOT NULL")
            .await?;
        snap.resolved_counts.tasks = self
            .count("SELECT COUNT(*) FROM tasks WHERE tenant_id IS NOT NULL")
            .await?;
        snap.resolved_counts.teams = self
            .count("SELECT COUNT(*) FROM teams WHERE tenant_id IS NOT NULL")
            .await?;
        snap.resolved_counts.users = self
            .count("SELECT COUNT(*) FROM users WHERE tenant_id IS NOT NULL")
            .await?;

        Ok(snap)
    }

    async fn load_tenant_map(
        &self,
        sql: &str,
    ) -> Result<std::collections::HashMap<Uuid, Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn count(&self, sql: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(sql).fetch_one(&self.pool).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Project,
    Task,
    Team,
    User,
}

impl EntityKind {
    fn table(&self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Task => "tasks",
            EntityKind::Team => "teams",
            EntityKind::User => "users",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_only_the_two_documented_values() {
        assert_eq!(BackfillMode::parse("dry_run").unwrap(), BackfillMode::DryRun);
        assert_eq!(BackfillMode::parse("apply").unwrap(), BackfillMode::Apply);
        assert!(BackfillMode::parse("APPLY").is_err());
        assert!(BackfillMode::parse("").is_err());
    }

    #[test]
    fn total_writes_subtracts_skipped_rows() {
        let mut report = BackfillReport {
            mode: BackfillMode::Apply,
            quarantine_tenant_id: Uuid::nil(),
            quarantine_tenant_created: false,
            projects: TypeReport::default(),
            tasks: TypeReport::default(),
            teams: TypeReport::default(),
            users: TypeReport::default(),
        };
        report.projects.inferred_count = 3;
        report.projects.quarantined_count = 2;
        report.projects.skipped_count = 1;
        assert_eq!(report.total_writes(), 4);
    }
}

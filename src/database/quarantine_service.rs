//! Quarantine manager
//!
//! Operator-facing surface over rows currently owned by the quarantine
//! tenant: browse, reassign to a real tenant, archive (users only), or
//! permanently delete. Every mutation is a single conditional statement
//! guarded by `tenant_id = <quarantine>`, which closes the race where an
//! operator acts on stale list data: a row reassigned concurrently simply
//! stops matching and the action reports `NOT_FOUND`.
//!
//! Each mutation and its audit event run in one transaction; the mutation
//! commits only together with the event that describes it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::audit_service::AuditService;
use crate::database::quarantine_tenant::QuarantineTenantResolver;
use crate::error::{EngineError, EngineResult};

/// Tables that can hold quarantined rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineTable {
    Project,
    Task,
    Team,
    User,
}

impl QuarantineTable {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "project" => Ok(Self::Project),
            "task" => Ok(Self::Task),
            "team" => Ok(Self::Team),
            "user" => Ok(Self::User),
            other => Err(EngineError::Validation(format!(
                "unknown table '{other}', expected project, task, team or user"
            ))),
        }
    }

    fn table_name(&self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Task => "tasks",
            Self::Team => "teams",
            Self::User => "users",
        }
    }

    /// Column used as the human-readable label and search target.
    fn label_column(&self) -> &'static str {
        match self {
            Self::Project | Self::Team => "name",
            Self::Task => "title",
            Self::User => "email",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedRow {
    pub id: Uuid,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineListPage {
    pub table: QuarantineTable,
    pub rows: Vec<QuarantinedRow>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineSummary {
    pub quarantine_tenant_id: Option<Uuid>,
    pub projects: i64,
    pub tasks: i64,
    pub teams: i64,
    pub users: i64,
}

/// Reassignment target. Secondary ids are optional and must belong to the
/// target tenant; which of them apply depends on the table.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignTarget {
    pub tenant_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
}

/// Outcome of an archive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived,
    /// Archiving a tenant-less project/task/team would hide it without
    /// resolving ownership; the operator should assign or delete instead.
    NotSupported,
}

#[derive(Clone)]
pub struct QuarantineService {
    pool: PgPool,
    resolver: QuarantineTenantResolver,
    audit: AuditService,
}

impl QuarantineService {
    pub fn new(pool: PgPool) -> Self {
        let resolver = QuarantineTenantResolver::new(pool.clone());
        let audit = AuditService::new(pool.clone());
        Self { pool, resolver, audit }
    }

    /// Per-table counts under the quarantine tenant. All zeros when the
    /// sentinel tenant has never been created.
    pub async fn summary(&self) -> EngineResult<QuarantineSummary> {
        let Some(qid) = self.resolver.resolve_if_exists().await? else {
            return Ok(QuarantineSummary {
                quarantine_tenant_id: None,
                projects: 0,
                tasks: 0,
                teams: 0,
                users: 0,
            });
        };

        let mut counts = [0i64; 4];
        for (i, table) in [
            QuarantineTable::Project,
            QuarantineTable::Task,
            QuarantineTable::Team,
            QuarantineTable::User,
        ]
        .iter()
        .enumerate()
        {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE tenant_id = $1",
                table.table_name()
            );
            counts[i] = sqlx::query_scalar(&sql).bind(qid).fetch_one(&self.pool).await?;
        }

        Ok(QuarantineSummary {
            quarantine_tenant_id: Some(qid),
            projects: counts[0],
            tasks: counts[1],
            teams: counts[2],
            users: counts[3],
        })
    }

    /// Paginated rows under the quarantine tenant. Search matches the
    /// label column (name/title/email) and the literal row id.
    pub async fn list(
        &self,
        table: QuarantineTable,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> EngineResult<QuarantineListPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let Some(qid) = self.resolver.resolve_if_exists().await? else {
            return Ok(QuarantineListPage {
                table,
                rows: Vec::new(),
                total: 0,
                page,
                limit,
            });
        };

        let label = table.label_column();
        let name = table.table_name();
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        let (rows, total) = match search {
            Some(q) => {
                let pattern = format!("%{q}%");
                let sql = format!(
                    "SELECT id, {label} FROM {name} \
                     WHERE tenant_id = $1 AND ({label} ILIKE $2 OR id::text = $3) \
                     ORDER BY {label} NULLS LAST, id \
                     LIMIT $4 OFFSET $5"
                );
                let rows: Vec<(Uuid, Option<String>)> = sqlx::query_as(&sql)
                    .bind(qid)
                    .bind(&pattern)
                    .bind(q)
                    .bind(limit)
                    .bind((page - 1) * limit)
                    .fetch_all(&self.pool)
                    .await?;

                let count_sql = format!(
                    "SELECT COUNT(*) FROM {name} \
                     WHERE tenant_id = $1 AND ({label} ILIKE $2 OR id::text = $3)"
                );
                let total: i64 = sqlx::query_scalar(&count_sql)
                    .bind(qid)
                    .bind(&pattern)
                    .bind(q)
                    .fetch_one(&self.pool)
                    .await?;
                (rows, total)
            }
            None => {
                let sql = format!(
                    "SELECT id, {label} FROM {name} WHERE tenant_id = $1 \
                     ORDER BY {label} NULLS LAST, id \
                     LIMIT $2 OFFSET $3"
                );
                let rows: Vec<(Uuid, Option<String>)> = sqlx::query_as(&sql)
                    .bind(qid)
                    .bind(limit)
                    .bind((page - 1) * limit)
                    .fetch_all(&self.pool)
                    .await?;

                let count_sql =
                    format!("SELECT COUNT(*) FROM {name} WHERE tenant_id = $1");
                let total: i64 = sqlx::query_scalar(&count_sql)
                    .bind(qid)
                    .fetch_one(&self.pool)
                    .await?;
                (rows, total)
            }
        };

        Ok(QuarantineListPage {
            table,
            rows: rows
                .into_iter()
                .map(|(id, label)| QuarantinedRow { id, label })
                .collect(),
            total,
            page,
            limit,
        })
    }

    /// Reassign a quarantined row to a real tenant.
    ///
    /// The target tenant and any supplied secondary id are validated before
    /// any write; a secondary id belonging to a different tenant is rejected
    /// at this edge, not just at write time. The update itself is guarded by
    /// `tenant_id = <quarantine>`, so a row another operator already
    /// reassigned reports `NOT_FOUND`.
    pub async fn assign(
        &self,
        table: QuarantineTable,
        row_id: Uuid,
        target: &AssignTarget,
        actor_user_id: Option<Uuid>,
    ) -> EngineResult<()> {
        let qid = self.require_quarantine_tenant().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM tenants WHERE id = $1")
            .bind(target.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!(
                "target tenant {} does not exist",
                target.tenant_id
            )));
        }

        self.validate_secondary_ids(table, target).await?;

        let mut tx = self.pool.begin().await?;

        let updated = match table {
            QuarantineTable::Project => {
                sqlx::query(
                    "UPDATE projects SET tenant_id = $1, \
                     workspace_id = COALESCE($2, workspace_id), \
                     client_id = COALESCE($3, client_id) \
                     WHERE id = $4 AND tenant_id = $5",
                )
                .bind(target.tenant_id)
                .bind(target.workspace_id)
                .bind(target.client_id)
                .bind(row_id)
                .bind(qid)
                .execute(&mut *tx)
                .await?
            }
            QuarantineTable::Task => {
                sqlx::query(
                    "UPDATE tasks SET tenant_id = $1, \
                     project_id = COALESCE($2, project_id), \
                     section_id = COALESCE($3, section_id) \
                     WHERE id = $4 AND tenant_id = $5",
                )
                .bind(target.tenant_id)
                .bind(target.project_id)
                .bind(target.section_id)
                .bind(row_id)
                .bind(qid)
                .execute(&mut *tx)
                .await?
            }
            QuarantineTable::Team => {
                sqlx::query(
                    "UPDATE teams SET tenant_id = $1, \
                     workspace_id = COALESCE($2, workspace_id) \
                     WHERE id = $3 AND tenant_id = $4",
                )
                .bind(target.tenant_id)
                .bind(target.workspace_id)
                .bind(row_id)
                .bind(qid)
                .execute(&mut *tx)
                .await?
            }
            QuarantineTable::User => {
                sqlx::query("UPDATE users SET tenant_id = $1 WHERE id = $2 AND tenant_id = $3")
                    .bind(target.tenant_id)
                    .bind(row_id)
                    .bind(qid)
                    .execute(&mut *tx)
                    .await?
            }
        };

        if updated.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!(
                "{} {row_id} is not in quarantine",
                table.table_name()
            )));
        }

        // Audited under the *target* tenant: that is where the row now lives.
        self.audit
            .record_in(
                &mut tx,
                target.tenant_id,
                actor_user_id,
                "quarantine.assign",
                &format!("reassigned quarantined {} {row_id}", table.table_name()),
                json!({
                    "table": table.table_name(),
                    "row_id": row_id,
                    "from_tenant_id": qid,
                    "workspace_id": target.workspace_id,
                    "project_id": target.project_id,
                    "client_id": target.client_id,
                    "section_id": target.section_id,
                }),
            )
            .await?;

        tx.commit().await?;

        info!(table = table.table_name(), row_id = %row_id, tenant_id = %target.tenant_id,
              "assigned quarantined row to tenant");
        Ok(())
    }

    /// Soft-archive a quarantined row. Only meaningful for users
    /// (`is_active = false`); other tables report `NotSupported`.
    pub async fn archive(
        &self,
        table: QuarantineTable,
        row_id: Uuid,
        actor_user_id: Option<Uuid>,
    ) -> EngineResult<ArchiveOutcome> {
        if table != QuarantineTable::User {
            return Ok(ArchiveOutcome::NotSupported);
        }

        let qid = self.require_quarantine_tenant().await?;

        let mut tx = self.pool.begin().await?;

        let updated =
            sqlx::query("UPDATE users SET is_active = false WHERE id = $1 AND tenant_id = $2")
                .bind(row_id)
                .bind(qid)
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!(
                "user {row_id} is not in quarantine"
            )));
        }

        self.audit
            .record_in(
                &mut tx,
                qid,
                actor_user_id,
                "quarantine.archive",
                &format!("archived quarantined user {row_id}"),
                json!({ "table": "users", "row_id": row_id }),
            )
            .await?;

        tx.commit().await?;

        Ok(ArchiveOutcome::Archived)
    }

    /// Permanently delete a quarantined row. Refuses to orphan children:
    /// a project with tasks or a task with subtasks reports `CONFLICT` and
    /// deletes nothing. Never cascades.
    ///
    /// The dependency check is part of the DELETE predicate itself
    /// (`AND NOT EXISTS ...`), so a child created between a prior check and
    /// the delete still blocks it; a zero-row outcome is then classified by
    /// re-counting dependents.
    pub async fn delete(
        &self,
        table: QuarantineTable,
        row_id: Uuid,
        actor_user_id: Option<Uuid>,
    ) -> EngineResult<()> {
        let qid = self.require_quarantine_tenant().await?;

        let mut tx = self.pool.begin().await?;

        let sql = match table {
            QuarantineTable::Project => {
                "DELETE FROM projects WHERE id = $1 AND tenant_id = $2 \
                 AND NOT EXISTS (SELECT 1 FROM tasks WHERE project_id = $1)"
            }
            QuarantineTable::Task => {
                "DELETE FROM tasks WHERE id = $1 AND tenant_id = $2 \
                 AND NOT EXISTS (SELECT 1 FROM tasks c WHERE c.parent_task_id = $1)"
            }
            QuarantineTable::Team => "DELETE FROM teams WHERE id = $1 AND tenant_id = $2",
            QuarantineTable::User => "DELETE FROM users WHERE id = $1 AND tenant_id = $2",
        };
        let deleted = sqlx::query(sql)
            .bind(row_id)
            .bind(qid)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            let dependents = match table {
                QuarantineTable::Project => {
                    sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = $1")
                        .bind(row_id)
                        .fetch_one(&mut *tx)
                        .await?
                }
                QuarantineTable::Task => {
                    sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE parent_task_id = $1")
                        .bind(row_id)
                        .fetch_one(&mut *tx)
                        .await?
                }
                QuarantineTable::Team | QuarantineTable::User => 0,
            };
            return Err(failed_delete_error(table, row_id, dependents));
        }

        self.audit
            .record_in(
                &mut tx,
                qid,
                actor_user_id,
                "quarantine.delete",
                &format!("permanently deleted quarantined {} {row_id}", table.table_name()),
                json!({ "table": table.table_name(), "row_id": row_id }),
            )
            .await?;

        tx.commit().await?;

        info!(table = table.table_name(), row_id = %row_id, "deleted quarantined row");
        Ok(())
    }

    async fn require_quarantine_tenant(&self) -> EngineResult<Uuid> {
        self.resolver
            .resolve_if_exists()
            .await?
            .ok_or_else(|| EngineError::NotFound("no quarantine tenant exists".to_string()))
    }

    /// Reject any supplied secondary id that is inapplicable to the table
    /// or that belongs to a tenant other than the target.
    async fn validate_secondary_ids(
        &self,
        table: QuarantineTable,
        target: &AssignTarget,
    ) -> EngineResult<()> {
        let applicable: Vec<(&str, Option<Uuid>)> = match table {
            QuarantineTable::Project => vec![
                ("workspace_id", target.workspace_id),
                ("client_id", target.client_id),
            ],
            QuarantineTable::Task => vec![
                ("project_id", target.project_id),
                ("section_id", target.section_id),
            ],
            QuarantineTable::Team => vec![("workspace_id", target.workspace_id)],
            QuarantineTable::User => Vec::new(),
        };

        for (field, supplied) in [
            ("workspace_id", target.workspace_id),
            ("project_id", target.project_id),
            ("client_id", target.client_id),
            ("section_id", target.section_id),
        ] {
            let is_applicable = applicable.iter().any(|(f, _)| *f == field);
            if supplied.is_some() && !is_applicable {
                return Err(EngineError::Validation(format!(
                    "{field} does not apply to table '{}'",
                    table.table_name()
                )));
            }
        }

        for (field, supplied) in &applicable {
            let Some(id) = supplied else { continue };
            let lookup_table = match *field {
                "workspace_id" => "workspaces",
                "project_id" => "projects",
                "client_id" => "clients",
                "section_id" => "sections",
                _ => unreachable!("unknown secondary field"),
            };
            let sql = format!("SELECT tenant_id FROM {lookup_table} WHERE id = $1");
            let owner: Option<Option<Uuid>> = sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            check_secondary_owner(field, *id, owner, target.tenant_id)?;
        }

        Ok(())
    }
}

/// Accept a supplied secondary id only when its row exists and is owned by
/// the target tenant. Rejection happens here, before any write.
fn check_secondary_owner(
    field: &str,
    id: Uuid,
    owner: Option<Option<Uuid>>,
    target_tenant: Uuid,
) -> EngineResult<()> {
    match owner {
        None => Err(EngineError::NotFound(format!("{field} {id} does not exist"))),
        Some(owner) if owner != Some(target_tenant) => Err(EngineError::Validation(format!(
            "{field} {id} belongs to a different tenant than the target"
        ))),
        Some(_) => Ok(()),
    }
}

/// Classify a DELETE that matched no row: dependents mean the delete was
/// blocked, otherwise the row is no longer in quarantine.
fn failed_delete_error(table: QuarantineTable, row_id: Uuid, dependents: i64) -> EngineError {
    if dependents > 0 {
        let children = match table {
            QuarantineTable::Project => "dependent task(s)",
            QuarantineTable::Task => "subtask(s)",
            QuarantineTable::Team | QuarantineTable::User => "dependent row(s)",
        };
        EngineError::Conflict(format!(
            "{} {row_id} has {dependents} {children}; reassign or delete them first",
            table.table_name()
        ))
    } else {
        EngineError::NotFound(format!(
            "{} {row_id} is not in quarantine",
            table.table_name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_parses_the_four_documented_names() {
        assert_eq!(QuarantineTable::parse("project").unwrap(), QuarantineTable::Project);
        assert_eq!(QuarantineTable::parse("task").unwrap(), QuarantineTable::Task);
        assert_eq!(QuarantineTable::parse("team").unwrap(), QuarantineTable::Team);
        assert_eq!(QuarantineTable::parse("user").unwrap(), QuarantineTable::User);
        assert!(QuarantineTable::parse("tenant").is_err());
        assert!(QuarantineTable::parse("Projects").is_err());
    }

    #[test]
    fn unknown_table_maps_to_validation_error() {
        let err = QuarantineTable::parse("workspace").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn label_columns_match_the_search_contract() {
        assert_eq!(QuarantineTable::Project.label_column(), "name");
        assert_eq!(QuarantineTable::Task.label_column(), "title");
        assert_eq!(QuarantineTable::Team.label_column(), "name");
        assert_eq!(QuarantineTable::User.label_column(), "email");
    }

    #[test]
    fn delete_of_project_with_dependent_tasks_is_a_conflict() {
        let err = failed_delete_error(QuarantineTable::Project, Uuid::from_u128(1), 3);
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.to_string().contains("dependent task"));
    }

    #[test]
    fn delete_of_task_with_subtasks_is_a_conflict() {
        let err = failed_delete_error(QuarantineTable::Task, Uuid::from_u128(2), 1);
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.to_string().contains("subtask"));
    }

    #[test]
    fn delete_with_no_dependents_means_the_row_left_quarantine() {
        let err = failed_delete_error(QuarantineTable::Project, Uuid::from_u128(3), 0);
        assert_eq!(err.code(), "NOT_FOUND");

        let err = failed_delete_error(QuarantineTable::User, Uuid::from_u128(4), 0);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn secondary_id_owned_by_another_tenant_is_rejected_before_any_write() {
        let target = Uuid::from_u128(10);
        let other = Uuid::from_u128(11);
        let err = check_secondary_owner("workspace_id", Uuid::from_u128(5), Some(Some(other)), target)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn secondary_id_with_no_owner_yet_is_rejected() {
        // A workspace whose tenant_id is still NULL cannot anchor an assign.
        let target = Uuid::from_u128(10);
        let err =
            check_secondary_owner("workspace_id", Uuid::from_u128(5), Some(None), target)
                .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn missing_secondary_id_is_not_found() {
        let err = check_secondary_owner("project_id", Uuid::from_u128(6), None, Uuid::from_u128(10))
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn matching_secondary_owner_passes() {
        let target = Uuid::from_u128(10);
        assert!(
            check_secondary_owner("client_id", Uuid::from_u128(7), Some(Some(target)), target)
                .is_ok()
        );
    }
}

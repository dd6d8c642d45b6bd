//! Integrity checker
//!
//! Read-only battery of structural checks. Nothing here remediates; the
//! point is to make the current violation surface observable before and
//! after a reconciliation pass. `blocker` issues are ones reconciliation
//! alone cannot fix (a cross-tenant foreign key means the invariant was
//! already violated, e.g. by a manual edit); `warn` issues are either
//! expected before a pass or need schema-level attention.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Sample ids reported per issue.
const SAMPLE_LIMIT: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Blocker,
    Warn,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub check: &'static str,
    pub severity: IssueSeverity,
    pub description: &'static str,
    pub count: i64,
    pub sample_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub blocker_count: i64,
    pub warn_count: i64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IntegrityService {
    pool: PgPool,
}

struct CheckDef {
    check: &'static str,
    severity: IssueSeverity,
    description: &'static str,
    count_sql: &'static str,
    sample_sql: &'static str,
}

const CHECKS: &[CheckDef] = &[
    CheckDef {
        check: "task_project_tenant_mismatch",
        severity: IssueSeverity::Blocker,
        description: "tasks whose tenant differs from their project's tenant",
        count_sql: "SELECT COUNT(*) FROM tasks t \
                    JOIN projects p ON p.id = t.project_id \
                    WHERE t.tenant_id IS NOT NULL AND p.tenant_id IS NOT NULL \
                      AND t.tenant_id <> p.tenant_id",
        sample_sql: "SELECT t.id FROM tasks t \
                     JOIN projects p ON p.id = t.project_id \
                     WHERE t.tenant_id IS NOT NULL AND p.tenant_id IS NOT NULL \
                       AND t.tenant_id <> p.tenant_id LIMIT $1",
    },
    CheckDef {
        check: "project_client_tenant_mismatch",
        severity: IssueSeverity::Blocker,
        description: "projects whose tenant differs from their client's tenant",
        count_sql: "SELECT COUNT(*) FROM projects p \
                    JOIN clients c ON c.id = p.client_id \
                    WHERE p.tenant_id IS NOT NULL AND c.tenant_id IS NOT NULL \
                      AND p.tenant_id <> c.tenant_id",
        sample_sql: "SELECT p.id FROM projects p \
                     JOIN clients c ON c.id = p.client_id \
                     WHERE p.tenant_id IS NOT NULL AND c.tenant_id IS NOT NULL \
                       AND p.tenant_id <> c.tenant_id LIMIT $1",
    },
    CheckDef {
        check: "team_workspace_tenant_mismatch",
        severity: IssueSeverity::Blocker,
        description: "teams whose tenant differs from their workspace's tenant",
        count_sql: "SELECT COUNT(*) FROM teams tm \
                    JOIN workspaces w ON w.id = tm.workspace_id \
                    WHERE tm.tenant_id IS NOT NULL AND w.tenant_id IS NOT NULL \
                      AND tm.tenant_id <> w.tenant_id",
        sample_sql: "SELECT tm.id FROM teams tm \
                     JOIN workspaces w ON w.id = tm.workspace_id \
                     WHERE tm.tenant_id IS NOT NULL AND w.tenant_id IS NOT NULL \
                       AND tm.tenant_id <> w.tenant_id LIMIT $1",
    },
    CheckDef {
        check: "users_missing_tenant",
        severity: IssueSeverity::Warn,
        description: "non-super-operator users without a tenant (expected before a backfill pass)",
        count_sql: "SELECT COUNT(*) FROM users \
                    WHERE tenant_id IS NULL AND role <> 'super_admin'",
        sample_sql: "SELECT id FROM users \
                     WHERE tenant_id IS NULL AND role <> 'super_admin' LIMIT $1",
    },
    CheckDef {
        check: "projects_missing_workspace",
        severity: IssueSeverity::Warn,
        description: "projects without a workspace",
        count_sql: "SELECT COUNT(*) FROM projects WHERE workspace_id IS NULL",
        sample_sql: "SELECT id FROM projects WHERE workspace_id IS NULL LIMIT $1",
    },
    CheckDef {
        check: "multiple_primary_workspaces",
        severity: IssueSeverity::Warn,
        description: "tenants with more than one primary workspace (sample ids are tenant ids)",
        count_sql: "SELECT COUNT(*) FROM ( \
                      SELECT tenant_id FROM workspaces \
                      WHERE is_primary AND tenant_id IS NOT NULL \
                      GROUP BY tenant_id HAVING COUNT(*) > 1 \
                    ) dup",
        sample_sql: "SELECT tenant_id FROM workspaces \
                     WHERE is_primary AND tenant_id IS NOT NULL \
                     GROUP BY tenant_id HAVING COUNT(*) > 1 LIMIT $1",
    },
];

impl IntegrityService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the full battery. Issues are data, not errors: a report full of
    /// blockers is still an `Ok` result.
    pub async fn run_checks(&self) -> Result<IntegrityReport> {
        let mut issues = Vec::with_capacity(CHECKS.len());

        for def in CHECKS {
            let count: i64 = sqlx::query_scalar(def.count_sql)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("integrity check '{}' failed", def.check))?;

            let sample_ids = if count > 0 {
                sqlx::query_scalar(def.sample_sql)
                    .bind(SAMPLE_LIMIT)
                    .fetch_all(&self.pool)
                    .await
                    .with_context(|| format!("sampling for check '{}' failed", def.check))?
            } else {
                Vec::new()
            };

            issues.push(IntegrityIssue {
                check: def.check,
                severity: def.severity,
                description: def.description,
                count,
                sample_ids,
            });
        }

        let blocker_count = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Blocker && i.count > 0)
            .count() as i64;
        let warn_count = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warn && i.count > 0)
            .count() as i64;

        Ok(IntegrityReport {
            issues,
            blocker_count,
            warn_count,
            checked_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_covers_the_documented_checks() {
        let names: Vec<_> = CHECKS.iter().map(|c| c.check).collect();
        assert_eq!(
            names,
            vec![
                "task_project_tenant_mismatch",
                "project_client_tenant_mismatch",
                "team_workspace_tenant_mismatch",
                "users_missing_tenant",
                "projects_missing_workspace",
                "multiple_primary_workspaces",
            ]
        );
    }

    #[test]
    fn cross_tenant_mismatches_are_blockers_and_the_rest_warn() {
        for def in CHECKS {
            let expected = if def.check.ends_with("tenant_mismatch") {
                IssueSeverity::Blocker
            } else {
                IssueSeverity::Warn
            };
            assert_eq!(def.severity, expected, "check {}", def.check);
        }
    }
}

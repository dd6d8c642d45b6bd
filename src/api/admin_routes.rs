//! Administrative REST routes
//!
//! The operator workflow: scan (read-only) to understand the blast radius,
//! backfill in apply mode to remediate, then disposition whatever landed in
//! quarantine. Scan and integrity endpoints always answer 200 with a report
//! even when issues are found - issues are data, not errors. Mutating
//! endpoints run their guard chain before touching the store.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{actor::AdminActor, AppState};
use crate::config::{BACKFILL_CONFIRM_HEADER, DELETE_CONFIRM_HEADER};
use crate::database::audit_service::{AuditEvent, AuditService};
use crate::database::integrity_service::{IntegrityReport, IntegrityService};
use crate::database::quarantine_service::{
    ArchiveOutcome, AssignTarget, QuarantineListPage, QuarantineService, QuarantineSummary,
    QuarantineTable,
};
use crate::error::EngineResult;
use crate::recon::{BackfillMode, BackfillReport, ReconciliationService, ScanReport};

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/api/quarantine/summary", get(quarantine_summary))
        .route("/api/quarantine/list", get(quarantine_list))
        .route("/api/quarantine/assign", post(quarantine_assign))
        .route("/api/quarantine/archive", post(quarantine_archive))
        .route("/api/quarantine/delete", post(quarantine_delete))
        .route("/api/quarantine/audit", get(quarantine_audit))
        .route("/api/tenantid/scan", get(tenantid_scan))
        .route("/api/tenantid/backfill", post(tenantid_backfill))
        .route("/api/integrity/checks", get(integrity_checks))
        .with_state(state)
}

// ============================================================================
// Quarantine browsing
// ============================================================================

async fn quarantine_summary(
    State(state): State<AppState>,
    Extension(_actor): Extension<AdminActor>,
) -> EngineResult<Json<QuarantineSummary>> {
    let summary = QuarantineService::new(state.pool).summary().await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    table: String,
    page: Option<i64>,
    limit: Option<i64>,
    q: Option<String>,
}

async fn quarantine_list(
    State(state): State<AppState>,
    Extension(_actor): Extension<AdminActor>,
    Query(params): Query<ListParams>,
) -> EngineResult<Json<QuarantineListPage>> {
    let table = QuarantineTable::parse(&params.table)?;
    let page = QuarantineService::new(state.pool)
        .list(
            table,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(25),
            params.q.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct AuditParams {
    limit: Option<i64>,
}

async fn quarantine_audit(
    State(state): State<AppState>,
    Extension(_actor): Extension<AdminActor>,
    Query(params): Query<AuditParams>,
) -> EngineResult<Json<Vec<AuditEvent>>> {
    let events = AuditService::new(state.pool).recent(params.limit).await?;
    Ok(Json(events))
}

// ============================================================================
// Quarantine dispositions
// ============================================================================

#[derive(Debug, Deserialize)]
struct AssignRequest {
    table: String,
    id: Uuid,
    assign_to: AssignTarget,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    status: &'static str,
    message: String,
}

async fn quarantine_assign(
    State(state): State<AppState>,
    Extension(actor): Extension<AdminActor>,
    Json(req): Json<AssignRequest>,
) -> EngineResult<Json<ActionResponse>> {
    state.gate.admin_action("quarantine.assign").evaluate()?;
    let table = QuarantineTable::parse(&req.table)?;

    QuarantineService::new(state.pool)
        .assign(table, req.id, &req.assign_to, Some(actor.user_id))
        .await?;

    Ok(Json(ActionResponse {
        status: "assigned",
        message: format!("row {} reassigned to tenant {}", req.id, req.assign_to.tenant_id),
    }))
}

#[derive(Debug, Deserialize)]
struct ArchiveRequest {
    table: String,
    id: Uuid,
}

async fn quarantine_archive(
    State(state): State<AppState>,
    Extension(actor): Extension<AdminActor>,
    Json(req): Json<ArchiveRequest>,
) -> EngineResult<Json<ActionResponse>> {
    state.gate.admin_action("quarantine.archive").evaluate()?;
    let table = QuarantineTable::parse(&req.table)?;

    let outcome = QuarantineService::new(state.pool)
        .archive(table, req.id, Some(actor.user_id))
        .await?;

    let response = match outcome {
        ArchiveOutcome::Archived => ActionResponse {
            status: "archived",
            message: format!("user {} deactivated", req.id),
        },
        ArchiveOutcome::NotSupported => ActionResponse {
            status: "not_supported",
            message: format!(
                "archive is not supported for table '{}'; use assign or delete",
                req.table
            ),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    table: String,
    id: Uuid,
    confirm_phrase: Option<String>,
}

async fn quarantine_delete(
    State(state): State<AppState>,
    Extension(actor): Extension<AdminActor>,
    headers: HeaderMap,
    Json(req): Json<DeleteRequest>,
) -> EngineResult<Json<ActionResponse>> {
    let header_phrase = headers
        .get(DELETE_CONFIRM_HEADER)
        .and_then(|v| v.to_str().ok());
    state
        .gate
        .quarantine_delete(header_phrase, req.confirm_phrase.as_deref())
        .evaluate()?;

    let table = QuarantineTable::parse(&req.table)?;
    QuarantineService::new(state.pool)
        .delete(table, req.id, Some(actor.user_id))
        .await?;

    Ok(Json(ActionResponse {
        status: "deleted",
        message: format!("row {} permanently deleted", req.id),
    }))
}

// ============================================================================
// Reconciliation
// ============================================================================

async fn tenantid_scan(
    State(state): State<AppState>,
    Extension(_actor): Extension<AdminActor>,
) -> EngineResult<Json<ScanReport>> {
    let report = ReconciliationService::new(state.pool).scan().await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct BackfillParams {
    mode: Option<String>,
}

async fn tenantid_backfill(
    State(state): State<AppState>,
    Extension(actor): Extension<AdminActor>,
    Query(params): Query<BackfillParams>,
    headers: HeaderMap,
) -> EngineResult<Json<BackfillReport>> {
    let mode = BackfillMode::parse(params.mode.as_deref().unwrap_or("dry_run"))?;

    if mode == BackfillMode::Apply {
        let confirm = headers
            .get(BACKFILL_CONFIRM_HEADER)
            .and_then(|v| v.to_str().ok());
        state.gate.backfill_apply(confirm).evaluate()?;
    }

    let report = ReconciliationService::new(state.pool)
        .run(mode, Some(actor.user_id))
        .await?;
    Ok(Json(report))
}

// ============================================================================
// Integrity
// ============================================================================

async fn integrity_checks(
    State(state): State<AppState>,
    Extension(_actor): Extension<AdminActor>,
) -> EngineResult<Json<IntegrityReport>> {
    let report = IntegrityService::new(state.pool).run_checks().await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyFlags;
    use crate::error::EngineError;
    use crate::safety::SafetyGate;

    #[test]
    fn delete_gate_refuses_without_both_confirmations() {
        let gate = SafetyGate::new(SafetyFlags {
            allow_backfill_apply: false,
            allow_quarantine_delete: true,
            allow_admin_actions: false,
        });
        // Body phrase alone is not enough.
        let err = gate
            .quarantine_delete(None, Some("DELETE_QUARANTINED_ROW"))
            .evaluate()
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn backfill_defaults_to_dry_run_mode() {
        assert_eq!(BackfillMode::parse("dry_run").unwrap(), BackfillMode::DryRun);
    }

    #[test]
    fn action_response_serializes_status_field() {
        let response = ActionResponse {
            status: "not_supported",
            message: "archive is not supported for table 'project'".into(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "not_supported");
    }
}

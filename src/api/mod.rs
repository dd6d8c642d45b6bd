//! REST API module for the reconciliation engine
//!
//! Assembles the administrative router: a public health probe plus the
//! quarantine/tenantid/integrity surface, all behind the super-operator
//! middleware.

use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::json;
use sqlx::PgPool;

use crate::config::SafetyFlags;
use crate::safety::SafetyGate;

pub mod actor;
pub mod admin_routes;

pub use actor::AdminActor;

/// Shared state for the admin routes.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gate: SafetyGate,
}

/// Create the full administrative router.
pub fn create_admin_router(pool: PgPool, flags: SafetyFlags) -> Router {
    let state = AppState {
        pool,
        gate: SafetyGate::new(flags),
    };

    let admin = admin_routes::admin_router(state.clone()).layer(
        middleware::from_fn_with_state(state, actor::require_super_operator),
    );

    Router::new()
        .route("/api/health", get(health))
        .merge(admin)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

//! Tenant reconciliation admin server
//!
//! REST surface for the tenant identity reconciliation and quarantine
//! engine, consumed by the (external) admin UI.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/app \
//!   ALLOW_TENANT_BACKFILL_APPLY=true \
//!   cargo run --bin admin_server
//!
//! curl -H 'X-Actor-Id: <super-operator uuid>' http://localhost:4000/api/tenantid/scan
//!
//! curl -X POST 'http://localhost:4000/api/tenantid/backfill?mode=apply' \
//!   -H 'X-Actor-Id: <super-operator uuid>' \
//!   -H 'X-Confirm-Backfill: APPLY_TENANTID_BACKFILL'
//! ```

use std::net::SocketAddr;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tenant_reconciler::api::create_admin_router;
use tenant_reconciler::database::DatabaseManager;
use tenant_reconciler::{DatabaseConfig, SafetyFlags};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_config = DatabaseConfig::default();
    let flags = SafetyFlags::from_env();

    tracing::info!(
        backfill_apply = flags.allow_backfill_apply,
        quarantine_delete = flags.allow_quarantine_delete,
        admin_actions = flags.allow_admin_actions,
        "safety flags loaded"
    );

    let db = DatabaseManager::connect(&db_config).await?;
    db.health_check().await?;

    let app = create_admin_router(db.pool().clone(), flags)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("ADMIN_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4000".to_string())
        .parse()?;

    println!("🚀 Tenant reconciliation admin server on http://{addr}");
    println!("  GET    /api/health");
    println!("  GET    /api/tenantid/scan");
    println!("  POST   /api/tenantid/backfill?mode=dry_run|apply");
    println!("  GET    /api/integrity/checks");
    println!("  GET    /api/quarantine/summary");
    println!("  GET    /api/quarantine/list?table=&page=&limit=&q=");
    println!("  POST   /api/quarantine/assign");
    println!("  POST   /api/quarantine/archive");
    println!("  POST   /api/quarantine/delete");
    println!("  GET    /api/quarantine/audit?limit=");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

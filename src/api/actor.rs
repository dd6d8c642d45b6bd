//! Super-operator extraction
//!
//! Authentication proper lives outside this subsystem; what this middleware
//! asserts is the precondition every engine action shares: the caller is an
//! active super-operator. The upstream auth layer identifies the caller via
//! the `X-Actor-Id` header; we resolve it against the users table and
//! refuse anything less than an active `super_admin` before a handler runs.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::EngineError;

/// The authenticated super-operator, injected as a request extension.
#[derive(Debug, Clone)]
pub struct AdminActor {
    pub user_id: Uuid,
    pub email: String,
}

pub async fn require_super_operator(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, EngineError> {
    let actor_id = req
        .headers()
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            EngineError::Forbidden("super-operator authentication required".to_string())
        })?;

    let row: Option<(String, String, bool)> =
        sqlx::query_as("SELECT email, role, is_active FROM users WHERE id = $1")
            .bind(actor_id)
            .fetch_optional(&state.pool)
            .await?;

    let actor = match row {
        Some((email, role, true)) if role == "super_admin" => AdminActor {
            user_id: actor_id,
            email,
        },
        _ => {
            tracing::warn!(actor_id = %actor_id, "refused non-super-operator");
            return Err(EngineError::Forbidden(
                "super-operator role required".to_string(),
            ));
        }
    };

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

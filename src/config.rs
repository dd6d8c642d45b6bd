//! Environment-driven configuration
//!
//! Two independent groups: database connection settings and the safety
//! allow-flags consumed by the guard chain. Each flag is separate so an
//! operator can enable apply-mode reconciliation without also enabling
//! permanent deletion.

use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/tenant-reconciler".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

/// Safety allow-flags, one per class of mutating action.
///
/// All default to off; a missing variable never enables anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyFlags {
    /// `ALLOW_TENANT_BACKFILL_APPLY` - apply-mode reconciliation passes.
    pub allow_backfill_apply: bool,
    /// `ALLOW_QUARANTINE_DELETE` - permanent deletion of quarantined rows.
    pub allow_quarantine_delete: bool,
    /// `ALLOW_ADMIN_ACTIONS` - other mutating admin actions (assign, archive).
    pub allow_admin_actions: bool,
}

impl SafetyFlags {
    pub fn from_env() -> Self {
        Self {
            allow_backfill_apply: env_flag("ALLOW_TENANT_BACKFILL_APPLY"),
            allow_quarantine_delete: env_flag("ALLOW_QUARANTINE_DELETE"),
            allow_admin_actions: env_flag("ALLOW_ADMIN_ACTIONS"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Confirmation phrase required for apply-mode backfill.
pub const BACKFILL_CONFIRM_PHRASE: &str = "APPLY_TENANTID_BACKFILL";
/// Header carrying the backfill confirmation phrase.
pub const BACKFILL_CONFIRM_HEADER: &str = "x-confirm-backfill";

/// Confirmation phrase required for quarantine delete, supplied twice
/// (header and body) so a single leaked header or replayed body is not
/// sufficient on its own.
pub const DELETE_CONFIRM_PHRASE: &str = "DELETE_QUARANTINED_ROW";
/// Header carrying the delete confirmation phrase.
pub const DELETE_CONFIRM_HEADER: &str = "x-confirm-delete";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_off() {
        let flags = SafetyFlags::default();
        assert!(!flags.allow_backfill_apply);
        assert!(!flags.allow_quarantine_delete);
        assert!(!flags.allow_admin_actions);
    }

    #[test]
    fn env_flag_accepts_common_truthy_values() {
        std::env::set_var("TEST_RECON_FLAG_A", "true");
        std::env::set_var("TEST_RECON_FLAG_B", "1");
        std::env::set_var("TEST_RECON_FLAG_C", "no");
        assert!(env_flag("TEST_RECON_FLAG_A"));
        assert!(env_flag("TEST_RECON_FLAG_B"));
        assert!(!env_flag("TEST_RECON_FLAG_C"));
        assert!(!env_flag("TEST_RECON_FLAG_UNSET"));
    }
}

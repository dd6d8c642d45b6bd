//! Safety gate
//!
//! Stateless guard chain evaluated before every mutating or destructive
//! action in this subsystem. A guard is an ordered list of checks evaluated
//! in sequence, short-circuiting on the first failure. Every failure maps to
//! the same `FORBIDDEN` taxonomy code with a generic message, so a caller
//! cannot tell from the response which specific flag or confirmation was
//! missing.
//!
//! Failing a gate is a no-op from the store's perspective: the guard is
//! always evaluated before the first write, and no audit event is recorded
//! for a refused action.

use crate::config::{
    SafetyFlags, BACKFILL_CONFIRM_PHRASE, DELETE_CONFIRM_PHRASE,
};
use crate::error::{EngineError, EngineResult};

/// One predicate in a guard chain.
#[derive(Debug, Clone)]
pub enum Check {
    /// Environment allow-flag must be enabled.
    AllowFlag { name: &'static str, enabled: bool },
    /// A literal confirmation phrase must be supplied and match exactly.
    Confirmation {
        source: &'static str,
        supplied: Option<String>,
        expected: &'static str,
    },
}

impl Check {
    fn passes(&self) -> bool {
        match self {
            Check::AllowFlag { enabled, .. } => *enabled,
            Check::Confirmation { supplied, expected, .. } => {
                supplied.as_deref() == Some(*expected)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Check::AllowFlag { name, .. } => format!("allow-flag {name}"),
            Check::Confirmation { source, .. } => format!("confirmation via {source}"),
        }
    }
}

/// Ordered chain of checks guarding one action.
#[derive(Debug, Clone)]
pub struct Guard {
    action: &'static str,
    checks: Vec<Check>,
}

impl Guard {
    pub fn new(action: &'static str) -> Self {
        Self { action, checks: Vec::new() }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Evaluate the chain, short-circuiting on the first failing check.
    ///
    /// The refusal logged server-side names the failing check; the error
    /// returned to the caller deliberately does not.
    pub fn evaluate(&self) -> EngineResult<()> {
        for check in &self.checks {
            if !check.passes() {
                tracing::warn!(
                    action = self.action,
                    check = %check.describe(),
                    "safety gate refused action"
                );
                return Err(EngineError::Forbidden(format!(
                    "action '{}' is not permitted",
                    self.action
                )));
            }
        }
        Ok(())
    }
}

/// Builds the guard chains for the actions this subsystem exposes.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    flags: SafetyFlags,
}

impl SafetyGate {
    pub fn new(flags: SafetyFlags) -> Self {
        Self { flags }
    }

    /// Apply-mode backfill: allow-flag plus confirmation header.
    pub fn backfill_apply(&self, confirm_header: Option<&str>) -> Guard {
        Guard::new("tenantid.backfill.apply")
            .check(Check::AllowFlag {
                name: "ALLOW_TENANT_BACKFILL_APPLY",
                enabled: self.flags.allow_backfill_apply,
            })
            .check(Check::Confirmation {
                source: "header",
                supplied: confirm_header.map(str::to_owned),
                expected: BACKFILL_CONFIRM_PHRASE,
            })
    }

    /// Permanent delete of a quarantined row: distinct allow-flag plus the
    /// confirmation phrase supplied twice, once in a header and once in the
    /// request body.
    pub fn quarantine_delete(
        &self,
        confirm_header: Option<&str>,
        confirm_body: Option<&str>,
    ) -> Guard {
        Guard::new("quarantine.delete")
            .check(Check::AllowFlag {
                name: "ALLOW_QUARANTINE_DELETE",
                enabled: self.flags.allow_quarantine_delete,
            })
            .check(Check::Confirmation {
                source: "header",
                supplied: confirm_header.map(str::to_owned),
                expected: DELETE_CONFIRM_PHRASE,
            })
            .check(Check::Confirmation {
                source: "body",
                supplied: confirm_body.map(str::to_owned),
                expected: DELETE_CONFIRM_PHRASE,
            })
    }

    /// Other mutating admin actions (assign, archive).
    pub fn admin_action(&self, action: &'static str) -> Guard {
        Guard::new(action).check(Check::AllowFlag {
            name: "ALLOW_ADMIN_ACTIONS",
            enabled: self.flags.allow_admin_actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> SafetyFlags {
        SafetyFlags {
            allow_backfill_apply: true,
            allow_quarantine_delete: true,
            allow_admin_actions: true,
        }
    }

    #[test]
    fn backfill_apply_requires_flag_and_header() {
        let gate = SafetyGate::new(SafetyFlags::default());
        assert!(gate
            .backfill_apply(Some(BACKFILL_CONFIRM_PHRASE))
            .evaluate()
            .is_err());

        let gate = SafetyGate::new(all_on());
        assert!(gate.backfill_apply(None).evaluate().is_err());
        assert!(gate.backfill_apply(Some("wrong")).evaluate().is_err());
        assert!(gate
            .backfill_apply(Some(BACKFILL_CONFIRM_PHRASE))
            .evaluate()
            .is_ok());
    }

    #[test]
    fn delete_requires_both_header_and_body_confirmation() {
        let gate = SafetyGate::new(all_on());
        assert!(gate
            .quarantine_delete(Some(DELETE_CONFIRM_PHRASE), None)
            .evaluate()
            .is_err());
        assert!(gate
            .quarantine_delete(None, Some(DELETE_CONFIRM_PHRASE))
            .evaluate()
            .is_err());
        assert!(gate
            .quarantine_delete(Some(DELETE_CONFIRM_PHRASE), Some(DELETE_CONFIRM_PHRASE))
            .evaluate()
            .is_ok());
    }

    #[test]
    fn delete_flag_is_independent_of_backfill_flag() {
        let flags = SafetyFlags {
            allow_backfill_apply: true,
            allow_quarantine_delete: false,
            allow_admin_actions: false,
        };
        let gate = SafetyGate::new(flags);
        assert!(gate
            .backfill_apply(Some(BACKFILL_CONFIRM_PHRASE))
            .evaluate()
            .is_ok());
        assert!(gate
            .quarantine_delete(Some(DELETE_CONFIRM_PHRASE), Some(DELETE_CONFIRM_PHRASE))
            .evaluate()
            .is_err());
    }

    #[test]
    fn gate_failures_use_the_forbidden_taxonomy() {
        let gate = SafetyGate::new(SafetyFlags::default());
        let err = gate.admin_action("quarantine.assign").evaluate().unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}

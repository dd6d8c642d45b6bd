//! Ownership inference
//!
//! Pure functions deriving a record's tenant from the already-resolved state
//! of the entities it references. No store access happens here; the caller
//! supplies the relevant signals from its pass-scoped lookup maps.
//!
//! Project, Task and Team use an ordered signal chain where the first
//! non-null signal wins. User inference is deliberately different: it
//! collects the full set of distinct candidate tenants and only trusts a
//! singleton. A user can legitimately carry signals pointing at multiple
//! tenants (a stale invitation, an authored project in another tenant), and
//! plurality logic would silently mis-assign a real operator. Zero or
//! multiple candidates both mean ambiguous, and ambiguous always means
//! quarantine, never a guess.

use std::collections::HashSet;
use uuid::Uuid;

/// Signals available to infer a project's tenant, in evaluation order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectSignals {
    pub workspace_tenant: Option<Uuid>,
    pub client_tenant: Option<Uuid>,
    pub creator_tenant: Option<Uuid>,
}

/// Project: workspace -> client -> creator, first hit wins.
pub fn infer_project(signals: ProjectSignals) -> Option<Uuid> {
    signals
        .workspace_tenant
        .or(signals.client_tenant)
        .or(signals.creator_tenant)
}

/// Task: resolved project first, then creator.
pub fn infer_task(project_tenant: Option<Uuid>, creator_tenant: Option<Uuid>) -> Option<Uuid> {
    project_tenant.or(creator_tenant)
}

/// Team: workspace only.
pub fn infer_team(workspace_tenant: Option<Uuid>) -> Option<Uuid> {
    workspace_tenant
}

/// Singleton-or-ambiguous rule for user inference.
///
/// Returns the tenant only when the candidate set has exactly one member.
/// An empty set (no signals at all) and a multi-member set are both
/// ambiguous.
pub fn unique_candidate(candidates: &HashSet<Uuid>) -> Option<Uuid> {
    if candidates.len() == 1 {
        candidates.iter().next().copied()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn project_chain_prefers_workspace_over_client_and_creator() {
        let signals = ProjectSignals {
            workspace_tenant: Some(t(1)),
            client_tenant: Some(t(2)),
            creator_tenant: Some(t(3)),
        };
        assert_eq!(infer_project(signals), Some(t(1)));
    }

    #[test]
    fn project_chain_falls_through_in_order() {
        let signals = ProjectSignals {
            workspace_tenant: None,
            client_tenant: Some(t(2)),
            creator_tenant: Some(t(3)),
        };
        assert_eq!(infer_project(signals), Some(t(2)));

        let signals = ProjectSignals {
            workspace_tenant: None,
            client_tenant: None,
            creator_tenant: Some(t(3)),
        };
        assert_eq!(infer_project(signals), Some(t(3)));
    }

    #[test]
    fn record_with_no_signals_is_ambiguous_not_an_error() {
        assert_eq!(infer_project(ProjectSignals::default()), None);
        assert_eq!(infer_task(None, None), None);
        assert_eq!(infer_team(None), None);
    }

    #[test]
    fn task_prefers_project_over_creator() {
        assert_eq!(infer_task(Some(t(1)), Some(t(2))), Some(t(1)));
        assert_eq!(infer_task(None, Some(t(2))), Some(t(2)));
    }

    #[test]
    fn singleton_candidate_set_is_trusted() {
        let mut set = HashSet::new();
        set.insert(t(7));
        assert_eq!(unique_candidate(&set), Some(t(7)));
    }

    #[test]
    fn empty_and_multi_candidate_sets_are_ambiguous() {
        let empty = HashSet::new();
        assert_eq!(unique_candidate(&empty), None);

        let mut two = HashSet::new();
        two.insert(t(1));
        two.insert(t(2));
        assert_eq!(unique_candidate(&two), None);
    }

    #[test]
    fn duplicate_signals_for_the_same_tenant_still_count_as_one() {
        // Two workspaces of the same tenant collapse into one candidate.
        let mut set = HashSet::new();
        set.insert(t(9));
        set.insert(t(9));
        assert_eq!(unique_candidate(&set), Some(t(9)));
    }
}

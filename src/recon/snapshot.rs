//! Pass snapshot and planner
//!
//! A [`PassSnapshot`] holds everything one reconciliation pass needs: the
//! resolved lookup maps (workspace/client/user/project -> tenant) and the
//! rows still missing a tenant, loaded once per invocation and dropped with
//! it. The lookup maps are owned by the pass, never process-wide, so they
//! cannot leak or go stale across invocations.
//!
//! [`plan_pass`] is pure: it walks entity types in the fixed dependency
//! order Project -> Task -> Team -> User and emits one decision per missing
//! row. Projects resolved earlier in the walk are fed back into the
//! project->tenant map so Task (and User, via authored projects) inference
//! chains within the same pass. Scan and apply both run this planner, which
//! is what makes their counts agree on a static snapshot.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::inference::{
    infer_project, infer_task, infer_team, unique_candidate, ProjectSignals,
};

/// Cap on sample ids reported per type for ambiguous rows.
pub const AMBIGUOUS_SAMPLE_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct MissingProject {
    pub id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MissingTask {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MissingTeam {
    pub id: Uuid,
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MissingUser {
    pub id: Uuid,
    pub email: String,
}

/// Per-type count of rows that already carry a tenant, for reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvedCounts {
    pub projects: i64,
    pub tasks: i64,
    pub teams: i64,
    pub users: i64,
}

/// Everything one pass reads, loaded up front.
#[derive(Debug, Default)]
pub struct PassSnapshot {
    pub workspace_tenants: HashMap<Uuid, Uuid>,
    pub client_tenants: HashMap<Uuid, Uuid>,
    pub user_tenants: HashMap<Uuid, Uuid>,
    /// Projects with a known tenant; updated in place as the planner
    /// resolves projects so downstream inference sees them.
    pub project_tenants: HashMap<Uuid, Uuid>,
    /// user id -> workspaces the user is a member of.
    pub user_memberships: HashMap<Uuid, Vec<Uuid>>,
    /// lowercased email -> tenants with a pending invitation for it.
    pub pending_invites: HashMap<String, Vec<Uuid>>,
    /// user id -> projects the user created.
    pub authored_projects: HashMap<Uuid, Vec<Uuid>>,
    pub missing_projects: Vec<MissingProject>,
    pub missing_tasks: Vec<MissingTask>,
    pub missing_teams: Vec<MissingTeam>,
    pub missing_users: Vec<MissingUser>,
    pub resolved_counts: ResolvedCounts,
}

/// Outcome for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Tenant inferred from signals.
    Resolve(Uuid),
    /// Ambiguous; park under the quarantine tenant.
    Quarantine,
}

#[derive(Debug, Clone, Copy)]
pub struct RowDecision {
    pub id: Uuid,
    pub decision: Decision,
}

#[derive(Debug, Clone, Default)]
pub struct TypePlan {
    pub decisions: Vec<RowDecision>,
    pub total_missing: i64,
    pub inferred_count: i64,
    pub quarantined_count: i64,
    pub already_resolved_count: i64,
    pub sample_ambiguous_ids: Vec<Uuid>,
}

impl TypePlan {
    fn push(&mut self, id: Uuid, decision: Decision) {
        self.total_missing += 1;
        match decision {
            Decision::Resolve(_) => self.inferred_count += 1,
            Decision::Quarantine => {
                self.quarantined_count += 1;
                if self.sample_ambiguous_ids.len() < AMBIGUOUS_SAMPLE_LIMIT {
                    self.sample_ambiguous_ids.push(id);
                }
            }
        }
        self.decisions.push(RowDecision { id, decision });
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassPlan {
    pub projects: TypePlan,
    pub tasks: TypePlan,
    pub teams: TypePlan,
    pub users: TypePlan,
}

/// Compute every row decision for one pass.
///
/// Mutates the snapshot's `project_tenants` map as projects resolve, so
/// later types chain off the same-pass results. Projects that land in
/// quarantine are deliberately not added to the map: quarantine is only ever
/// an explicit fallback, so it must not propagate through signal chains
/// within the pass.
pub fn plan_pass(snapshot: &mut PassSnapshot) -> PassPlan {
    let mut plan = PassPlan::default();
    plan.projects.already_resolved_count = snapshot.resolved_counts.projects;
    plan.tasks.already_resolved_count = snapshot.resolved_counts.tasks;
    plan.teams.already_resolved_count = snapshot.resolved_counts.teams;
    plan.users.already_resolved_count = snapshot.resolved_counts.users;

    let missing_projects = std::mem::take(&mut snapshot.missing_projects);
    for project in &missing_projects {
        let signals = ProjectSignals {
            workspace_tenant: project
                .workspace_id
                .and_then(|id| snapshot.workspace_tenants.get(&id).copied()),
            client_tenant: project
                .client_id
                .and_then(|id| snapshot.client_tenants.get(&id).copied()),
            creator_tenant: project
                .created_by
                .and_then(|id| snapshot.user_tenants.get(&id).copied()),
        };
        match infer_project(signals) {
            Some(tenant) => {
                snapshot.project_tenants.insert(project.id, tenant);
                plan.projects.push(project.id, Decision::Resolve(tenant));
            }
            None => plan.projects.push(project.id, Decision::Quarantine),
        }
    }
    snapshot.missing_projects = missing_projects;

    for task in &snapshot.missing_tasks {
        let project_tenant = task
            .project_id
            .and_then(|id| snapshot.project_tenants.get(&id).copied());
        let creator_tenant = task
            .created_by
            .and_then(|id| snapshot.user_tenants.get(&id).copied());
        match infer_task(project_tenant, creator_tenant) {
            Some(tenant) => plan.tasks.push(task.id, Decision::Resolve(tenant)),
            None => plan.tasks.push(task.id, Decision::Quarantine),
        }
    }

    for team in &snapshot.missing_teams {
        let workspace_tenant = team
            .workspace_id
            .and_then(|id| snapshot.workspace_tenants.get(&id).copied());
        match infer_team(workspace_tenant) {
            Some(tenant) => plan.teams.push(team.id, Decision::Resolve(tenant)),
            None => plan.teams.push(team.id, Decision::Quarantine),
        }
    }

    for user in &snapshot.missing_users {
        let candidates = user_candidates(snapshot, user);
        match unique_candidate(&candidates) {
            Some(tenant) => plan.users.push(user.id, Decision::Resolve(tenant)),
            None => plan.users.push(user.id, Decision::Quarantine),
        }
    }

    plan
}

/// Collect the distinct tenants reachable from a user's signals: workspace
/// memberships, pending invitations matched by email, and authored projects.
fn user_candidates(snapshot: &PassSnapshot, user: &MissingUser) -> HashSet<Uuid> {
    let mut candidates = HashSet::new();

    if let Some(workspaces) = snapshot.user_memberships.get(&user.id) {
        for workspace_id in workspaces {
            if let Some(tenant) = snapshot.workspace_tenants.get(workspace_id) {
                candidates.insert(*tenant);
            }
        }
    }

    if let Some(tenants) = snapshot.pending_invites.get(&user.email.to_lowercase()) {
        candidates.extend(tenants.iter().copied());
    }

    if let Some(projects) = snapshot.authored_projects.get(&user.id) {
        for project_id in projects {
            if let Some(tenant) = snapshot.project_tenants.get(project_id) {
                candidates.insert(*tenant);
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn task_inherits_project_resolved_in_the_same_pass() {
        // Project P: workspace W1 -> T1. Task X references P. Both null.
        let p = t(100);
        let w1 = t(200);
        let t1 = t(1);
        let mut snapshot = PassSnapshot::default();
        snapshot.workspace_tenants.insert(w1, t1);
        snapshot.missing_projects.push(MissingProject {
            id: p,
            workspace_id: Some(w1),
            client_id: None,
            created_by: None,
        });
        snapshot.missing_tasks.push(MissingTask {
            id: t(101),
            project_id: Some(p),
            created_by: None,
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.projects.decisions[0].decision, Decision::Resolve(t1));
        assert_eq!(plan.tasks.decisions[0].decision, Decision::Resolve(t1));
        assert_eq!(plan.projects.quarantined_count, 0);
        assert_eq!(plan.tasks.quarantined_count, 0);
    }

    #[test]
    fn quarantined_project_does_not_propagate_through_the_task_chain() {
        let p = t(100);
        let mut snapshot = PassSnapshot::default();
        snapshot.missing_projects.push(MissingProject {
            id: p,
            workspace_id: None,
            client_id: None,
            created_by: None,
        });
        snapshot.missing_tasks.push(MissingTask {
            id: t(101),
            project_id: Some(p),
            created_by: None,
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.projects.decisions[0].decision, Decision::Quarantine);
        // The task falls through to its own (absent) signals, not to the
        // project's quarantine placement.
        assert_eq!(plan.tasks.decisions[0].decision, Decision::Quarantine);
    }

    #[test]
    fn user_reachable_from_two_tenants_is_always_quarantined() {
        let u = t(300);
        let (w1, w2) = (t(201), t(202));
        let mut snapshot = PassSnapshot::default();
        snapshot.workspace_tenants.insert(w1, t(1));
        snapshot.workspace_tenants.insert(w2, t(2));
        snapshot.user_memberships.insert(u, vec![w1, w2]);
        snapshot.missing_users.push(MissingUser {
            id: u,
            email: "op@example.com".into(),
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.users.decisions[0].decision, Decision::Quarantine);

        // Ordering of the membership rows must not matter.
        let mut snapshot = PassSnapshot::default();
        snapshot.workspace_tenants.insert(w1, t(1));
        snapshot.workspace_tenants.insert(w2, t(2));
        snapshot.user_memberships.insert(u, vec![w2, w1]);
        snapshot.missing_users.push(MissingUser {
            id: u,
            email: "op@example.com".into(),
        });
        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.users.decisions[0].decision, Decision::Quarantine);
    }

    #[test]
    fn user_with_single_candidate_via_invitation_is_resolved() {
        let u = t(300);
        let mut snapshot = PassSnapshot::default();
        snapshot
            .pending_invites
            .insert("op@example.com".into(), vec![t(1)]);
        snapshot.missing_users.push(MissingUser {
            id: u,
            email: "Op@Example.com".into(),
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.users.decisions[0].decision, Decision::Resolve(t(1)));
    }

    #[test]
    fn user_sees_projects_resolved_earlier_in_the_same_pass() {
        let u = t(300);
        let p = t(100);
        let w1 = t(200);
        let mut snapshot = PassSnapshot::default();
        snapshot.workspace_tenants.insert(w1, t(1));
        snapshot.missing_projects.push(MissingProject {
            id: p,
            workspace_id: Some(w1),
            client_id: None,
            created_by: Some(u),
        });
        snapshot.authored_projects.insert(u, vec![p]);
        snapshot.missing_users.push(MissingUser {
            id: u,
            email: "maker@example.com".into(),
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.projects.decisions[0].decision, Decision::Resolve(t(1)));
        assert_eq!(plan.users.decisions[0].decision, Decision::Resolve(t(1)));
    }

    #[test]
    fn user_with_no_signals_is_quarantined() {
        let mut snapshot = PassSnapshot::default();
        snapshot.missing_users.push(MissingUser {
            id: t(300),
            email: "nobody@example.com".into(),
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.users.total_missing, 1);
        assert_eq!(plan.users.quarantined_count, 1);
        assert_eq!(plan.users.sample_ambiguous_ids, vec![t(300)]);
    }

    #[test]
    fn signal_pointing_at_an_already_quarantined_workspace_resolves_normally() {
        // A workspace whose tenant is the quarantine tenant (from a prior
        // pass) is just another resolved signal; the chain passes it through.
        let quarantine = t(999);
        let mut snapshot = PassSnapshot::default();
        snapshot.workspace_tenants.insert(t(200), quarantine);
        snapshot.missing_teams.push(MissingTeam {
            id: t(400),
            workspace_id: Some(t(200)),
        });

        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.teams.decisions[0].decision, Decision::Resolve(quarantine));
        assert_eq!(plan.teams.quarantined_count, 0);
    }

    #[test]
    fn second_pass_over_applied_snapshot_plans_zero_decisions() {
        // Simulate apply: everything the first plan touched now has a
        // tenant, so the missing sets are empty on the second load.
        let mut first = PassSnapshot::default();
        first.workspace_tenants.insert(t(200), t(1));
        first.missing_projects.push(MissingProject {
            id: t(100),
            workspace_id: Some(t(200)),
            client_id: None,
            created_by: None,
        });
        let first_plan = plan_pass(&mut first);
        assert_eq!(first_plan.projects.total_missing, 1);

        let mut second = PassSnapshot::default();
        second.workspace_tenants.insert(t(200), t(1));
        second.project_tenants.insert(t(100), t(1));
        second.resolved_counts.projects = 1;
        let second_plan = plan_pass(&mut second);
        assert_eq!(second_plan.projects.total_missing, 0);
        assert!(second_plan.projects.decisions.is_empty());
        assert_eq!(second_plan.projects.already_resolved_count, 1);
    }

    #[test]
    fn ambiguous_samples_are_capped() {
        let mut snapshot = PassSnapshot::default();
        for n in 0..60u128 {
            snapshot.missing_teams.push(MissingTeam {
                id: t(1000 + n),
                workspace_id: None,
            });
        }
        let plan = plan_pass(&mut snapshot);
        assert_eq!(plan.teams.quarantined_count, 60);
        assert_eq!(plan.teams.sample_ambiguous_ids.len(), AMBIGUOUS_SAMPLE_LIMIT);
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use gatekeep_core::{Scope, UserId};

use super::action::{Action, Resource};
use super::voter::{OrganizationVoter, PlatformVoter, Vote, VoteContext, Voter};
use crate::role_graph::RoleGraph;
use crate::{Principal, RoleName};

/// Outcome of an authorization decision. Denial is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Granted,
    Denied,
}

impl Decision {
    pub fn is_granted(self) -> bool {
        matches!(self, Decision::Granted)
    }
}

/// Combines the role graph and the registered voters into one decision.
///
/// - No IO
/// - No panics
/// - Fails closed: no applicable voter, any deny, or only abstentions all deny
pub struct AuthorizationEngine {
    graph: Arc<RoleGraph>,
    voters: Vec<Box<dyn Voter>>,
}

impl core::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("voters", &self.voters.iter().map(|v| v.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl AuthorizationEngine {
    /// Engine with no voters; every decision is `Denied` until voters are added.
    pub fn new(graph: Arc<RoleGraph>) -> Self {
        Self {
            graph,
            voters: Vec::new(),
        }
    }

    /// Engine with the default organization and platform voters.
    pub fn with_default_voters(graph: Arc<RoleGraph>) -> Self {
        Self::new(graph)
            .with_voter(OrganizationVoter::default())
            .with_voter(PlatformVoter::default())
    }

    pub fn with_voter(mut self, voter: impl Voter + 'static) -> Self {
        self.voters.push(Box::new(voter));
        self
    }

    pub fn graph(&self) -> &Arc<RoleGraph> {
        &self.graph
    }

    /// Union of the closures of every direct assignment `principal` holds in
    /// exactly `scope`. Roles unknown to the graph contribute nothing.
    pub fn effective_roles(&self, principal: &Principal, scope: Scope) -> BTreeSet<RoleName> {
        let mut effective = BTreeSet::new();
        for role in principal.roles_in(scope) {
            match self.graph.resolve_included_roles(role.as_str()) {
                Ok(included) => effective.extend(included.iter().cloned()),
                Err(err) => {
                    tracing::debug!(
                        user_id = %principal.user_id,
                        role = %role,
                        %scope,
                        error = %err,
                        "ignoring unresolvable role assignment"
                    );
                }
            }
        }
        effective
    }

    pub fn decide(&self, principal: &Principal, action: &Action, resource: &Resource) -> Decision {
        let evaluation = self.evaluate(principal, action, resource);
        if let Some(denial) = evaluation.denial {
            tracing::debug!(
                user_id = %principal.user_id,
                %action,
                scope = %resource.scope,
                denial = ?denial,
                "authorization denied"
            );
        }
        evaluation.decision
    }

    pub fn is_granted(&self, principal: &Principal, action: &Action, resource: &Resource) -> bool {
        self.decide(principal, action, resource).is_granted()
    }

    fn evaluate(&self, principal: &Principal, action: &Action, resource: &Resource) -> Evaluation {
        let scope = resource.scope;
        let effective = self.effective_roles(principal, scope);
        let ctx = VoteContext {
            scope,
            effective_roles: &effective,
        };

        let mut verdicts = Vec::new();
        for voter in self.voters.iter().filter(|v| v.supports(action, resource)) {
            verdicts.push(VoterVerdict {
                voter: voter.name().to_string(),
                vote: voter.vote(&ctx, principal, action, resource),
                required_role: voter.required_role(action).map(|r| r.to_string()),
            });
        }

        let denial = if verdicts.is_empty() {
            Some(DenialKind::NoApplicableVoter)
        } else if verdicts.iter().any(|v| v.vote == Vote::Deny) {
            Some(DenialKind::VoterDenied)
        } else if verdicts.iter().all(|v| v.vote == Vote::Abstain) {
            Some(DenialKind::AllAbstained)
        } else {
            None
        };

        Evaluation {
            decision: if denial.is_none() {
                Decision::Granted
            } else {
                Decision::Denied
            },
            denial,
            effective,
            verdicts,
        }
    }
}

struct Evaluation {
    decision: Decision,
    denial: Option<DenialKind>,
    effective: BTreeSet<RoleName>,
    verdicts: Vec<VoterVerdict>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this request allowed/denied?" for admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub action: String,
    pub scope: Scope,
    pub decision: Decision,
    pub reason: String,
    pub principal: PrincipalState,
    /// Every voter that applied, in registration order.
    pub votes: Vec<VoterVerdict>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub direct_roles: Vec<String>,
    pub effective_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoterVerdict {
    pub voter: String,
    pub vote: Vote,
    pub required_role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoApplicableVoter,
    VoterDenied,
    AllAbstained,
}

impl AuthorizationEngine {
    /// Explain why a decision was (or would be) made. Same evaluation as
    /// [`AuthorizationEngine::decide`], with the working shown.
    pub fn explain(
        &self,
        principal: &Principal,
        action: &Action,
        resource: &Resource,
    ) -> AuthorizationExplanation {
        let evaluation = self.evaluate(principal, action, resource);
        let scope = resource.scope;

        let principal_state = PrincipalState {
            user_id: principal.user_id,
            direct_roles: principal.roles_in(scope).map(|r| r.to_string()).collect(),
            effective_roles: evaluation.effective.iter().map(|r| r.to_string()).collect(),
        };

        let required: Vec<String> = evaluation
            .verdicts
            .iter()
            .filter_map(|v| v.required_role.clone())
            .collect();

        let (reason, denial_reason) = match evaluation.denial {
            None => {
                let granted_by: Vec<&str> = evaluation
                    .verdicts
                    .iter()
                    .filter(|v| v.vote == Vote::Grant)
                    .map(|v| v.voter.as_str())
                    .collect();
                (format!("granted in {scope} by voter(s) {granted_by:?}"), None)
            }
            Some(kind @ DenialKind::NoApplicableVoter) => (
                format!("no voter handles '{action}' on {scope}"),
                Some(DenialReason {
                    kind,
                    message: "no registered voter supports this action/resource pair".to_string(),
                    suggestions: vec![
                        format!(
                            "Register a voter that supports resources of kind '{}'",
                            resource.kind
                        ),
                        "Check that the resource carries the intended scope".to_string(),
                    ],
                }),
            ),
            Some(kind @ DenialKind::VoterDenied) => {
                let deniers: Vec<&str> = evaluation
                    .verdicts
                    .iter()
                    .filter(|v| v.vote == Vote::Deny)
                    .map(|v| v.voter.as_str())
                    .collect();
                (
                    format!("denied in {scope} by voter(s) {deniers:?}"),
                    Some(DenialReason {
                        kind,
                        message: format!(
                            "effective roles {:?} do not include required role(s) {required:?}",
                            principal_state.effective_roles
                        ),
                        suggestions: required
                            .iter()
                            .map(|r| format!("Assign '{r}' (or a role above it) in {scope}"))
                            .collect(),
                    }),
                )
            }
            Some(kind @ DenialKind::AllAbstained) => (
                format!("every applicable voter abstained on '{action}'"),
                Some(DenialReason {
                    kind,
                    message: format!("no requirement is defined for '{action}'"),
                    suggestions: vec![format!("Add '{action}' to a voter's requirement table")],
                }),
            ),
        };

        AuthorizationExplanation {
            action: action.to_string(),
            scope,
            decision: evaluation.decision,
            reason,
            principal: principal_state,
            votes: evaluation.verdicts,
            denial_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use gatekeep_core::OrganizationId;

    use super::*;
    use crate::authorization::actions;
    use crate::roles::{ADMIN, MEMBER, OWNER, VIEWER};

    fn engine() -> AuthorizationEngine {
        let graph = Arc::new(RoleGraph::with_standard_roles().unwrap());
        AuthorizationEngine::with_default_voters(graph)
    }

    fn org() -> Scope {
        Scope::organization(OrganizationId::new())
    }

    #[test]
    fn no_voters_fails_closed() {
        let graph = Arc::new(RoleGraph::with_standard_roles().unwrap());
        let engine = AuthorizationEngine::new(graph);
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(OWNER, scope);

        let decision = engine.decide(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope),
        );
        assert_eq!(decision, Decision::Denied);
    }

    #[test]
    fn no_applicable_voter_fails_closed() {
        let graph = Arc::new(RoleGraph::with_standard_roles().unwrap());
        let engine = AuthorizationEngine::new(graph).with_voter(PlatformVoter::default());
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(OWNER, scope);

        let explanation = engine.explain(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope),
        );
        assert_eq!(explanation.decision, Decision::Denied);
        assert_eq!(
            explanation.denial_reason.map(|d| d.kind),
            Some(DenialKind::NoApplicableVoter)
        );
    }

    #[test]
    fn inherited_roles_satisfy_requirements() {
        let engine = engine();
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(ADMIN, scope);
        let resource = Resource::new("members", scope);

        assert!(engine.is_granted(&principal, &actions::MEMBERS_LIST, &resource));
        assert!(engine.is_granted(&principal, &actions::MEMBERS_REMOVE, &resource));
        assert!(!engine.is_granted(&principal, &actions::ORGANIZATION_DELETE, &resource));
    }

    #[test]
    fn decisions_are_independent_per_scope() {
        let engine = engine();
        let (org_a, org_b) = (org(), org());
        let principal = Principal::new(UserId::new())
            .with_role(ADMIN, org_a)
            .with_role(VIEWER, org_b);

        assert!(engine.is_granted(
            &principal,
            &actions::MEMBERS_REMOVE,
            &Resource::new("members", org_a)
        ));
        assert!(!engine.is_granted(
            &principal,
            &actions::MEMBERS_REMOVE,
            &Resource::new("members", org_b)
        ));
        assert!(engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", org_b)
        ));
        assert!(!engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", org())
        ));
    }

    #[test]
    fn platform_roles_do_not_leak_into_organizations() {
        let engine = engine();
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(OWNER, Scope::Platform);

        assert!(engine.is_granted(
            &principal,
            &actions::PLATFORM_USERS_UNLOCK,
            &Resource::platform("users")
        ));
        assert!(!engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope)
        ));
    }

    #[test]
    fn unknown_action_is_denied_when_all_abstain() {
        let engine = engine();
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(OWNER, scope);

        let explanation = engine.explain(
            &principal,
            &Action::new("organization.billing.export"),
            &Resource::new("billing", scope),
        );
        assert_eq!(explanation.decision, Decision::Denied);
        assert_eq!(
            explanation.denial_reason.unwrap().kind,
            DenialKind::AllAbstained
        );
    }

    #[test]
    fn unknown_roles_contribute_nothing() {
        let engine = engine();
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role("ghost", scope);
        assert!(engine.effective_roles(&principal, scope).is_empty());
        assert!(!engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope)
        ));
    }

    #[test]
    fn explanation_lists_votes_and_suggestions() {
        let engine = engine();
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(MEMBER, scope);

        let explanation = engine.explain(
            &principal,
            &actions::MEMBERS_REMOVE,
            &Resource::new("members", scope),
        );
        assert_eq!(explanation.decision, Decision::Denied);
        assert_eq!(explanation.votes.len(), 1);
        assert_eq!(explanation.votes[0].vote, Vote::Deny);
        assert_eq!(explanation.votes[0].required_role.as_deref(), Some(ADMIN));
        assert_eq!(explanation.principal.direct_roles, vec![MEMBER]);

        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::VoterDenied);
        assert!(denial.suggestions[0].contains("admin"));
    }

    /// A voter that always grants must still be overruled by a deny.
    struct AlwaysGrant;

    impl Voter for AlwaysGrant {
        fn name(&self) -> &str {
            "always_grant"
        }

        fn supports(&self, _action: &Action, _resource: &Resource) -> bool {
            true
        }

        fn vote(&self, _: &VoteContext<'_>, _: &Principal, _: &Action, _: &Resource) -> Vote {
            Vote::Grant
        }
    }

    #[test]
    fn any_deny_overrules_grants() {
        let graph = Arc::new(RoleGraph::with_standard_roles().unwrap());
        let engine = AuthorizationEngine::with_default_voters(graph).with_voter(AlwaysGrant);
        let scope = org();
        let principal = Principal::new(UserId::new()).with_role(VIEWER, scope);

        assert!(!engine.is_granted(
            &principal,
            &actions::MEMBERS_REMOVE,
            &Resource::new("members", scope)
        ));
        assert!(engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope)
        ));
    }

    #[test]
    fn role_graph_changes_are_visible_immediately() {
        let engine = engine();
        let scope = org();
        engine
            .graph()
            .create_role(crate::NewRole::root("auditor"))
            .unwrap();
        let principal = Principal::new(UserId::new()).with_role("auditor", scope);
        assert!(!engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope)
        ));

        engine
            .graph()
            .set_parent(VIEWER, Some(RoleName::new("auditor")))
            .unwrap();
        assert!(engine.is_granted(
            &principal,
            &actions::ORGANIZATION_READ,
            &Resource::new("organization", scope)
        ));
    }
}

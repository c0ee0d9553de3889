//! Pluggable policy evaluators.
//!
//! A voter only ever sees the effective roles the engine resolved for the
//! resource's scope; it never resolves roles itself and never aggregates.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use gatekeep_core::Scope;

use super::action::{Action, Resource, actions};
use crate::roles::{ADMIN, MANAGER, MEMBER, OWNER, VIEWER};
use crate::{Principal, RoleName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Grant,
    Deny,
    Abstain,
}

/// Everything the engine resolved before asking a voter.
#[derive(Debug, Clone)]
pub struct VoteContext<'a> {
    pub scope: Scope,
    /// Union of the closures of every direct assignment held in `scope`.
    pub effective_roles: &'a BTreeSet<RoleName>,
}

impl VoteContext<'_> {
    pub fn has_role(&self, role: &str) -> bool {
        self.effective_roles.contains(role)
    }
}

/// Policy evaluator for (principal, action, resource) tuples.
pub trait Voter: Send + Sync {
    /// Stable name used in explanations and logs.
    fn name(&self) -> &str;

    fn supports(&self, action: &Action, resource: &Resource) -> bool;

    fn vote(
        &self,
        ctx: &VoteContext<'_>,
        principal: &Principal,
        action: &Action,
        resource: &Resource,
    ) -> Vote;

    /// Minimum role this voter requires for `action`, if it has an opinion.
    fn required_role(&self, _action: &Action) -> Option<RoleName> {
        None
    }
}

/// Action → minimum required role.
#[derive(Debug, Clone, Default)]
pub struct RequirementTable {
    requirements: HashMap<Action, RoleName>,
}

impl RequirementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, action: Action, role: impl Into<RoleName>) -> Self {
        self.requirements.insert(action, role.into());
        self
    }

    pub fn minimum_role(&self, action: &Action) -> Option<&RoleName> {
        self.requirements.get(action)
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Defaults for organization-scoped actions over the standard role tree.
    pub fn organization_defaults() -> Self {
        Self::new()
            .require(actions::ORGANIZATION_READ, VIEWER)
            .require(actions::MEMBERS_LIST, MEMBER)
            .require(actions::MEMBERS_INVITE, MANAGER)
            .require(actions::MEMBERS_REMOVE, ADMIN)
            .require(actions::ROLES_ASSIGN, ADMIN)
            .require(actions::ORGANIZATION_UPDATE, ADMIN)
            .require(actions::ORGANIZATION_DELETE, OWNER)
    }

    /// Defaults for platform-scoped actions over the standard role tree.
    pub fn platform_defaults() -> Self {
        Self::new()
            .require(actions::PLATFORM_AUDIT_READ, MANAGER)
            .require(actions::PLATFORM_USERS_LIST, ADMIN)
            .require(actions::PLATFORM_USERS_UNLOCK, ADMIN)
            .require(actions::PLATFORM_ROLES_MANAGE, OWNER)
    }

    fn vote(&self, ctx: &VoteContext<'_>, action: &Action) -> Vote {
        match self.minimum_role(action) {
            None => Vote::Abstain,
            Some(required) if ctx.has_role(required.as_str()) => Vote::Grant,
            Some(_) => Vote::Deny,
        }
    }
}

/// Votes on resources owned by an organization.
#[derive(Debug, Clone)]
pub struct OrganizationVoter {
    table: RequirementTable,
}

impl OrganizationVoter {
    pub fn new(table: RequirementTable) -> Self {
        Self { table }
    }
}

impl Default for OrganizationVoter {
    fn default() -> Self {
        Self::new(RequirementTable::organization_defaults())
    }
}

impl Voter for OrganizationVoter {
    fn name(&self) -> &str {
        "organization"
    }

    fn supports(&self, _action: &Action, resource: &Resource) -> bool {
        !resource.scope.is_platform()
    }

    fn vote(
        &self,
        ctx: &VoteContext<'_>,
        _principal: &Principal,
        action: &Action,
        resource: &Resource,
    ) -> Vote {
        // The engine already resolved roles for the resource scope; a mismatch
        // means the context was built for something else.
        if ctx.scope != resource.scope {
            return Vote::Deny;
        }
        self.table.vote(ctx, action)
    }

    fn required_role(&self, action: &Action) -> Option<RoleName> {
        self.table.minimum_role(action).cloned()
    }
}

/// Votes on unscoped (platform-wide) resources.
#[derive(Debug, Clone)]
pub struct PlatformVoter {
    table: RequirementTable,
}

impl PlatformVoter {
    pub fn new(table: RequirementTable) -> Self {
        Self { table }
    }
}

impl Default for PlatformVoter {
    fn default() -> Self {
        Self::new(RequirementTable::platform_defaults())
    }
}

impl Voter for PlatformVoter {
    fn name(&self) -> &str {
        "platform"
    }

    fn supports(&self, _action: &Action, resource: &Resource) -> bool {
        resource.scope.is_platform()
    }

    fn vote(
        &self,
        ctx: &VoteContext<'_>,
        _principal: &Principal,
        action: &Action,
        _resource: &Resource,
    ) -> Vote {
        if !ctx.scope.is_platform() {
            return Vote::Deny;
        }
        self.table.vote(ctx, action)
    }

    fn required_role(&self, action: &Action) -> Option<RoleName> {
        self.table.minimum_role(action).cloned()
    }
}

#[cfg(test)]
mod tests {
    use gatekeep_core::{OrganizationId, UserId};

    use super::*;

    fn roles(names: &[&'static str]) -> BTreeSet<RoleName> {
        names.iter().map(|n| RoleName::new(*n)).collect()
    }

    #[test]
    fn organization_voter_only_supports_scoped_resources() {
        let voter = OrganizationVoter::default();
        let org = Scope::organization(OrganizationId::new());
        assert!(voter.supports(&actions::MEMBERS_LIST, &Resource::new("members", org)));
        assert!(!voter.supports(&actions::MEMBERS_LIST, &Resource::platform("members")));
    }

    #[test]
    fn table_votes_on_minimum_role() {
        let voter = OrganizationVoter::default();
        let org = Scope::organization(OrganizationId::new());
        let resource = Resource::new("members", org);
        let principal = Principal::new(UserId::new());
        let effective = roles(&[MEMBER, VIEWER]);
        let ctx = VoteContext {
            scope: org,
            effective_roles: &effective,
        };

        assert_eq!(voter.vote(&ctx, &principal, &actions::MEMBERS_LIST, &resource), Vote::Grant);
        assert_eq!(voter.vote(&ctx, &principal, &actions::MEMBERS_REMOVE, &resource), Vote::Deny);
        assert_eq!(
            voter.vote(&ctx, &principal, &Action::new("billing.export"), &resource),
            Vote::Abstain
        );
    }

    #[test]
    fn mismatched_context_scope_denies() {
        let voter = OrganizationVoter::default();
        let resource = Resource::new("members", Scope::organization(OrganizationId::new()));
        let effective = roles(&[OWNER]);
        let ctx = VoteContext {
            scope: Scope::organization(OrganizationId::new()),
            effective_roles: &effective,
        };
        let principal = Principal::new(UserId::new());
        assert_eq!(
            voter.vote(&ctx, &principal, &actions::ORGANIZATION_READ, &resource),
            Vote::Deny
        );
    }

    #[test]
    fn action_family_is_leading_segment() {
        assert_eq!(actions::PLATFORM_USERS_UNLOCK.family(), "platform");
    }
}

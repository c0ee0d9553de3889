use serde::{Deserialize, Serialize};

use gatekeep_core::{Scope, UserId};

use crate::RoleName;

/// A direct role grant. Inherited roles are never stored, they are derived
/// from the role tree at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role: RoleName,
    pub scope: Scope,
}

impl RoleAssignment {
    pub fn new(user_id: UserId, role: impl Into<RoleName>, scope: Scope) -> Self {
        Self {
            user_id,
            role: role.into(),
            scope,
        }
    }
}

/// A user plus every assignment reachable at decision time.
///
/// Construction is decoupled from storage: callers build it from whatever
/// assignment source they trust (see `AssignmentService::load_principal`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub assignments: Vec<RoleAssignment>,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            assignments: Vec::new(),
        }
    }

    /// Add a direct assignment for this principal.
    pub fn with_role(mut self, role: impl Into<RoleName>, scope: Scope) -> Self {
        self.assignments
            .push(RoleAssignment::new(self.user_id, role, scope));
        self
    }

    /// Directly assigned roles in exactly `scope`.
    ///
    /// Assignments from other scopes (including platform-wide ones when
    /// `scope` is an organization) are never returned.
    pub fn roles_in(&self, scope: Scope) -> impl Iterator<Item = &RoleName> {
        self.assignments
            .iter()
            .filter(move |a| a.user_id == self.user_id && a.scope == scope)
            .map(|a| &a.role)
    }
}

//! Role assignment storage and the guarded grant/revoke service.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use gatekeep_core::{Scope, UserId};

use crate::role_graph::RoleGraph;
use crate::safeguard::{RoleRemovalSafeguard, SafeguardViolation};
use crate::store::StoreError;
use crate::{Principal, RoleAssignment, RoleName};

/// Persistence contract for direct role assignments.
pub trait AssignmentStore: Send + Sync {
    fn assignments_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError>;

    fn assignments_in_scope(&self, scope: Scope) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Returns `false` if the exact assignment already existed.
    fn insert(&self, assignment: RoleAssignment) -> Result<bool, StoreError>;

    /// Returns `false` if the assignment did not exist.
    fn remove(&self, assignment: &RoleAssignment) -> Result<bool, StoreError>;
}

impl<S> AssignmentStore for Arc<S>
where
    S: AssignmentStore + ?Sized,
{
    fn assignments_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        (**self).assignments_for_user(user_id)
    }

    fn assignments_in_scope(&self, scope: Scope) -> Result<Vec<RoleAssignment>, StoreError> {
        (**self).assignments_in_scope(scope)
    }

    fn insert(&self, assignment: RoleAssignment) -> Result<bool, StoreError> {
        (**self).insert(assignment)
    }

    fn remove(&self, assignment: &RoleAssignment) -> Result<bool, StoreError> {
        (**self).remove(assignment)
    }
}

/// In-memory assignment store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    rows: RwLock<HashSet<RoleAssignment>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn assignments_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = self.rows.read()?;
        let mut out: Vec<RoleAssignment> = rows
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.scope, &a.role).cmp(&(b.scope, &b.role)));
        Ok(out)
    }

    fn assignments_in_scope(&self, scope: Scope) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = self.rows.read()?;
        Ok(rows.iter().filter(|a| a.scope == scope).cloned().collect())
    }

    fn insert(&self, assignment: RoleAssignment) -> Result<bool, StoreError> {
        Ok(self.rows.write()?.insert(assignment))
    }

    fn remove(&self, assignment: &RoleAssignment) -> Result<bool, StoreError> {
        Ok(self.rows.write()?.remove(assignment))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("role '{0}' is not defined")]
    UnknownRole(RoleName),

    #[error("role '{role}' is already assigned in {scope}")]
    AlreadyAssigned { role: RoleName, scope: Scope },

    #[error("role '{role}' is not assigned in {scope}")]
    NotAssigned { role: RoleName, scope: Scope },

    #[error(transparent)]
    Safeguard(#[from] SafeguardViolation),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Grant/revoke entry point for admin tooling.
///
/// Every revoke and member removal is checked by the [`RoleRemovalSafeguard`]
/// first. Guarded mutations are serialized through an internal gate so two
/// administrators cannot remove each other concurrently and both pass the
/// last-admin check.
pub struct AssignmentService {
    store: Arc<dyn AssignmentStore>,
    graph: Arc<RoleGraph>,
    safeguard: Arc<RoleRemovalSafeguard>,
    gate: Mutex<()>,
}

impl AssignmentService {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        graph: Arc<RoleGraph>,
        safeguard: Arc<RoleRemovalSafeguard>,
    ) -> Self {
        Self {
            store,
            graph,
            safeguard,
            gate: Mutex::new(()),
        }
    }

    /// Build a principal from the assignments stored right now.
    pub fn load_principal(&self, user_id: UserId) -> Result<Principal, AssignmentError> {
        Ok(Principal {
            user_id,
            assignments: self.store.assignments_for_user(user_id)?,
        })
    }

    pub fn grant(
        &self,
        user_id: UserId,
        role: RoleName,
        scope: Scope,
        actor_id: UserId,
    ) -> Result<RoleAssignment, AssignmentError> {
        if !self.graph.contains(role.as_str()) {
            return Err(AssignmentError::UnknownRole(role));
        }

        let assignment = RoleAssignment::new(user_id, role, scope);
        let _gate = self.gate.lock().map_err(StoreError::from)?;
        if !self.store.insert(assignment.clone())? {
            return Err(AssignmentError::AlreadyAssigned {
                role: assignment.role,
                scope,
            });
        }

        tracing::info!(%user_id, %actor_id, role = %assignment.role, %scope, "role granted");
        Ok(assignment)
    }

    pub fn revoke(
        &self,
        user_id: UserId,
        role: RoleName,
        scope: Scope,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), AssignmentError> {
        let _gate = self.gate.lock().map_err(StoreError::from)?;

        self.safeguard
            .check_removal(user_id, &role, scope, actor_id, now)
            .into_result()?;

        let assignment = RoleAssignment::new(user_id, role, scope);
        if !self.store.remove(&assignment)? {
            return Err(AssignmentError::NotAssigned {
                role: assignment.role,
                scope,
            });
        }

        tracing::info!(%user_id, %actor_id, role = %assignment.role, %scope, "role revoked");
        Ok(())
    }

    /// Drop every assignment `user_id` holds in `scope`.
    pub fn remove_member(
        &self,
        user_id: UserId,
        scope: Scope,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, AssignmentError> {
        let _gate = self.gate.lock().map_err(StoreError::from)?;

        self.safeguard
            .check_member_removal(user_id, scope, actor_id, now)
            .into_result()?;

        let held: Vec<RoleAssignment> = self
            .store
            .assignments_for_user(user_id)?
            .into_iter()
            .filter(|a| a.scope == scope)
            .collect();

        let mut removed = Vec::with_capacity(held.len());
        for assignment in held {
            if self.store.remove(&assignment)? {
                removed.push(assignment);
            }
        }

        tracing::info!(%user_id, %actor_id, %scope, removed = removed.len(), "member removed");
        Ok(removed)
    }
}

//! Last-administrator protection for role revokes, demotions and member removal.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use gatekeep_audit::{AuditAction, AuditEvent, AuditSink, emit};
use gatekeep_core::{Scope, UserId};

use crate::assignments::AssignmentStore;
use crate::{RoleAssignment, RoleName};

/// Structured reason a removal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafeguardReason {
    /// The removal would leave the scope without any administrator.
    LastAdministrator,
    /// The target does not hold what is being removed.
    AssignmentNotFound,
    /// Assignments could not be read; refusing rather than guessing.
    StoreUnavailable,
}

impl SafeguardReason {
    pub fn code(&self) -> &'static str {
        match self {
            SafeguardReason::LastAdministrator => "LAST_ADMINISTRATOR",
            SafeguardReason::AssignmentNotFound => "ASSIGNMENT_NOT_FOUND",
            SafeguardReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

impl core::fmt::Display for SafeguardReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafeguardDecision {
    pub allowed: bool,
    pub reason: Option<SafeguardReason>,
}

/// A refused removal, as an error for callers that propagate with `?`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("role removal blocked in {scope}: {reason}")]
pub struct SafeguardViolation {
    pub reason: SafeguardReason,
    pub subject_id: UserId,
    pub scope: Scope,
}

impl SafeguardDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: SafeguardReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// A decision bundled with the context needed to turn it into an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeguardOutcome {
    pub decision: SafeguardDecision,
    pub subject_id: UserId,
    pub scope: Scope,
}

impl SafeguardOutcome {
    pub fn is_allowed(&self) -> bool {
        self.decision.allowed
    }

    pub fn into_result(self) -> Result<(), SafeguardViolation> {
        match self.decision.reason {
            None if self.decision.allowed => Ok(()),
            reason => Err(SafeguardViolation {
                // A denial without a reason is still a denial.
                reason: reason.unwrap_or(SafeguardReason::StoreUnavailable),
                subject_id: self.subject_id,
                scope: self.scope,
            }),
        }
    }
}

/// Blocks role mutations that would leave a scope with no administrator.
pub struct RoleRemovalSafeguard {
    admin_roles: BTreeSet<RoleName>,
    store: Arc<dyn AssignmentStore>,
    audit: Arc<dyn AuditSink>,
}

impl core::fmt::Debug for RoleRemovalSafeguard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleRemovalSafeguard")
            .field("admin_roles", &self.admin_roles)
            .finish()
    }
}

impl RoleRemovalSafeguard {
    pub fn new(
        admin_roles: impl IntoIterator<Item = RoleName>,
        store: Arc<dyn AssignmentStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            admin_roles: admin_roles.into_iter().collect(),
            store,
            audit,
        }
    }

    pub fn is_admin_level(&self, role: &str) -> bool {
        self.admin_roles.contains(role)
    }

    /// May `role` be taken away from `target_id` in `scope`?
    pub fn check_removal(
        &self,
        target_id: UserId,
        role: &RoleName,
        scope: Scope,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> SafeguardOutcome {
        let decision = if !self.is_admin_level(role.as_str()) {
            SafeguardDecision::allow()
        } else {
            let removed = RoleAssignment::new(target_id, role.clone(), scope);
            self.evaluate(scope, |a| a == &removed, |held| held.contains(&removed))
        };
        self.finish(decision, target_id, scope, actor_id, now)
    }

    /// May `target_id` be removed from `scope` altogether?
    pub fn check_member_removal(
        &self,
        target_id: UserId,
        scope: Scope,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> SafeguardOutcome {
        let decision = self.evaluate(
            scope,
            |a| a.user_id == target_id,
            |held| held.iter().any(|a| a.user_id == target_id),
        );
        self.finish(decision, target_id, scope, actor_id, now)
    }

    /// Count distinct principals still holding an admin-level role in `scope`
    /// once every assignment matching `is_removed` is gone.
    fn evaluate(
        &self,
        scope: Scope,
        is_removed: impl Fn(&RoleAssignment) -> bool,
        target_holds: impl Fn(&[RoleAssignment]) -> bool,
    ) -> SafeguardDecision {
        let held = match self.store.assignments_in_scope(scope) {
            Ok(held) => held,
            Err(err) => {
                tracing::error!(%scope, error = %err, "safeguard could not read assignments");
                return SafeguardDecision::deny(SafeguardReason::StoreUnavailable);
            }
        };

        if !target_holds(&held) {
            return SafeguardDecision::deny(SafeguardReason::AssignmentNotFound);
        }

        let removes_admin = held
            .iter()
            .any(|a| is_removed(a) && self.is_admin_level(a.role.as_str()));
        if !removes_admin {
            return SafeguardDecision::allow();
        }

        let remaining: HashSet<UserId> = held
            .iter()
            .filter(|a| a.scope == scope && !is_removed(a) && self.is_admin_level(a.role.as_str()))
            .map(|a| a.user_id)
            .collect();

        if remaining.is_empty() {
            SafeguardDecision::deny(SafeguardReason::LastAdministrator)
        } else {
            SafeguardDecision::allow()
        }
    }

    fn finish(
        &self,
        decision: SafeguardDecision,
        subject_id: UserId,
        scope: Scope,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> SafeguardOutcome {
        if let Some(reason) = decision.reason {
            tracing::warn!(%actor_id, %subject_id, %scope, %reason, "role removal blocked");
            emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::RoleRemovalBlocked, subject_id, now)
                    .with_actor(actor_id)
                    .with_scope(scope)
                    .with_reason(reason.code()),
            );
        }
        SafeguardOutcome {
            decision,
            subject_id,
            scope,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gatekeep_core::{Scope, UserId};

/// Stable action codes understood by the audit collaborator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A role revoke/demote/member removal was refused by the last-admin safeguard.
    RoleRemovalBlocked,
    /// A stale remember-me token was replayed; every session of the owner was revoked.
    SessionTheftDetected,
    /// An account crossed the failed-login threshold.
    AccountLocked,
    /// An administrator lifted a lock before it expired.
    AccountUnlocked,
}

impl AuditAction {
    pub fn code(&self) -> &'static str {
        match self {
            AuditAction::RoleRemovalBlocked => "ROLE_REMOVAL_BLOCKED",
            AuditAction::SessionTheftDetected => "SESSION_THEFT_DETECTED",
            AuditAction::AccountLocked => "ACCOUNT_LOCKED",
            AuditAction::AccountUnlocked => "ACCOUNT_UNLOCKED",
        }
    }

    /// Severity used when the emitter does not override it.
    pub fn default_severity(&self) -> Severity {
        match self {
            AuditAction::SessionTheftDetected => Severity::Critical,
            AuditAction::RoleRemovalBlocked => Severity::Warning,
            AuditAction::AccountLocked => Severity::Warning,
            AuditAction::AccountUnlocked => Severity::Info,
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

/// A single security-relevant fact.
///
/// Events are immutable once built. Every event names the subject it concerns;
/// `actor_id` is absent when the transition was triggered by the subject's own
/// login traffic rather than by another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub action: AuditAction,
    pub severity: Severity,
    pub actor_id: Option<UserId>,
    pub subject_id: UserId,
    pub scope: Option<Scope>,
    /// Machine-readable reason code (e.g. `LAST_ADMINISTRATOR`).
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, subject_id: UserId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            action,
            severity: action.default_severity(),
            actor_id: None,
            subject_id,
            scope: None,
            reason: String::new(),
            occurred_at,
        }
    }

    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_severity_from_action() {
        let event = AuditEvent::new(AuditAction::SessionTheftDetected, UserId::new(), Utc::now());
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.actor_id.is_none());
    }

    #[test]
    fn action_serializes_as_code() {
        let json = serde_json::to_value(AuditAction::RoleRemovalBlocked).unwrap();
        assert_eq!(json, serde_json::json!("ROLE_REMOVAL_BLOCKED"));
        assert_eq!(AuditAction::RoleRemovalBlocked.code(), "ROLE_REMOVAL_BLOCKED");
    }
}

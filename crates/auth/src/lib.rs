//! `gatekeep-auth` — authorization and credential-security core.
//!
//! Hierarchical RBAC with voter-based decisions, the last-administrator
//! safeguard, failed-login lockout, rotating remember-me grants and step-up
//! tokens. Transport and storage are left to callers; every store is a trait
//! with an in-memory implementation.

pub mod assignments;
pub mod authorization;
pub mod config;
pub mod lockout;
pub mod login;
pub mod principal;
pub mod remember_me;
pub mod role_graph;
pub mod roles;
pub mod safeguard;
pub mod step_up;
pub mod store;
pub mod time;

pub use assignments::{
    AssignmentError, AssignmentService, AssignmentStore, InMemoryAssignmentStore,
};
pub use authorization::{Action, AuthorizationEngine, Decision, Resource, Vote, Voter};
pub use config::SecurityConfig;
pub use lockout::{CredentialLockout, LockoutError, LockoutPolicy, LockoutStatus};
pub use login::{Authenticator, LoginAttempt, LoginError, LoginOutcome};
pub use principal::{Principal, RoleAssignment};
pub use remember_me::{PersistentSessionManager, SessionError};
pub use role_graph::{RoleGraph, RoleGraphError};
pub use roles::{NewRole, RoleDefinition, RoleName};
pub use safeguard::{RoleRemovalSafeguard, SafeguardDecision, SafeguardReason};
pub use step_up::{StepUpPurpose, StepUpTokenIssuer, TokenError};
pub use store::StoreError;

//! Voter-based authorization over the role graph.

pub mod action;
pub mod engine;
pub mod voter;

pub use action::{Action, Resource, actions};
pub use engine::{
    AuthorizationEngine, AuthorizationExplanation, Decision, DenialKind, DenialReason,
    PrincipalState, VoterVerdict,
};
pub use voter::{OrganizationVoter, PlatformVoter, RequirementTable, Vote, VoteContext, Voter};

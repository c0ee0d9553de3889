//! `gatekeep-core` — identifiers and scoping primitives shared by every gatekeep crate.
//!
//! This crate is pure data: no IO, no clocks, no storage.

pub mod error;
pub mod id;
pub mod scope;

pub use error::{CoreError, CoreResult};
pub use id::{OrganizationId, RoleId, UserId};
pub use scope::Scope;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use gatekeep_core::Scope;

/// Action identifier.
///
/// Actions are opaque dotted strings (e.g. `"organization.members.remove"`);
/// the voters decide which role each one requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading segment of the action (`"organization"` for `"organization.read"`).
    pub fn family(&self) -> &str {
        self.as_str().split('.').next().unwrap_or_default()
    }
}

impl From<&'static str> for Action {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The thing an action targets.
///
/// The scope is always explicit: an organization-owned resource carries its
/// organization, anything else is platform-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub kind: Cow<'static, str>,
    pub scope: Scope,
    pub id: Option<String>,
}

impl Resource {
    pub fn new(kind: impl Into<Cow<'static, str>>, scope: Scope) -> Self {
        Self {
            kind: kind.into(),
            scope,
            id: None,
        }
    }

    pub fn platform(kind: impl Into<Cow<'static, str>>) -> Self {
        Self::new(kind, Scope::Platform)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Well-known actions used by the default requirement tables.
pub mod actions {
    use super::Action;

    pub const ORGANIZATION_READ: Action = Action::from_static("organization.read");
    pub const ORGANIZATION_UPDATE: Action = Action::from_static("organization.update");
    pub const ORGANIZATION_DELETE: Action = Action::from_static("organization.delete");
    pub const MEMBERS_LIST: Action = Action::from_static("organization.members.list");
    pub const MEMBERS_INVITE: Action = Action::from_static("organization.members.invite");
    pub const MEMBERS_REMOVE: Action = Action::from_static("organization.members.remove");
    pub const ROLES_ASSIGN: Action = Action::from_static("organization.roles.assign");

    pub const PLATFORM_USERS_LIST: Action = Action::from_static("platform.users.list");
    pub const PLATFORM_USERS_UNLOCK: Action = Action::from_static("platform.users.unlock");
    pub const PLATFORM_AUDIT_READ: Action = Action::from_static("platform.audit.read");
    pub const PLATFORM_ROLES_MANAGE: Action = Action::from_static("platform.roles.manage");
}

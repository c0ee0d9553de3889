use std::borrow::{Borrow, Cow};

use serde::{Deserialize, Serialize};

use gatekeep_core::RoleId;

/// Symbolic, unique role name (e.g. `"admin"`).
///
/// Names are the lookup key for the role tree; ids exist for storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node of the role tree.
///
/// `parent` is the single role this one sits beneath: the parent *includes*
/// this role and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: RoleId,
    pub name: RoleName,
    pub parent: Option<RoleName>,
    /// System roles ship with the platform and cannot be deleted.
    pub is_system: bool,
}

/// Request to create a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: RoleName,
    pub parent: Option<RoleName>,
    #[serde(default)]
    pub is_system: bool,
}

impl NewRole {
    pub fn root(name: impl Into<RoleName>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_system: false,
        }
    }

    pub fn child_of(name: impl Into<RoleName>, parent: impl Into<RoleName>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            is_system: false,
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

pub const OWNER: &str = "owner";
pub const ADMIN: &str = "admin";
pub const MANAGER: &str = "manager";
pub const MEMBER: &str = "member";
pub const VIEWER: &str = "viewer";

/// The built-in hierarchy, parents first:
/// `owner ⊃ admin ⊃ manager ⊃ member ⊃ viewer`.
pub fn standard_roles() -> Vec<NewRole> {
    vec![
        NewRole::root(OWNER).system(),
        NewRole::child_of(ADMIN, OWNER).system(),
        NewRole::child_of(MANAGER, ADMIN).system(),
        NewRole::child_of(MEMBER, MANAGER).system(),
        NewRole::child_of(VIEWER, MEMBER).system(),
    ]
}

//! Authorization scope: platform-wide or a single organization.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::OrganizationId;

/// The context a role assignment or an authorization decision applies to.
///
/// Scopes never nest: a platform-wide assignment says nothing about any
/// organization, and one organization's assignments say nothing about another's.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Platform,
    Organization(OrganizationId),
}

impl Scope {
    pub fn organization(id: OrganizationId) -> Self {
        Self::Organization(id)
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, Scope::Platform)
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        match self {
            Scope::Platform => None,
            Scope::Organization(id) => Some(*id),
        }
    }
}

impl From<Option<OrganizationId>> for Scope {
    fn from(value: Option<OrganizationId>) -> Self {
        match value {
            Some(id) => Scope::Organization(id),
            None => Scope::Platform,
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Platform => f.write_str("platform"),
            Scope::Organization(id) => write!(f, "org:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "platform" {
            return Ok(Scope::Platform);
        }
        let id = s.strip_prefix("org:").ok_or_else(|| {
            CoreError::invalid_scope(format!("expected 'platform' or 'org:<uuid>', got '{s}'"))
        })?;
        Ok(Scope::Organization(id.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let org = Scope::organization(OrganizationId::new());
        assert_eq!(org.to_string().parse::<Scope>().unwrap(), org);
        assert_eq!("platform".parse::<Scope>().unwrap(), Scope::Platform);
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(matches!(
            "tenant:abc".parse::<Scope>(),
            Err(CoreError::InvalidScope(_))
        ));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Scope::Platform).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "platform" }));
    }
}

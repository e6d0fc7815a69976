use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Role;

/// Fine-grained action a role may be granted on a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Export,
    BulkUpdate,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Export,
        Action::BulkUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Export => "export",
            Action::BulkUpdate => "bulk_update",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = GrantSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(GrantSpecError::EmptyAction);
        }
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == trimmed)
            .ok_or_else(|| GrantSpecError::UnknownAction(trimmed.to_string()))
    }
}

/// Coarse role → resource grant ("can this role see/use this resource at all").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGrant {
    pub role: Role,
    pub resource: String,
    pub allowed: bool,
}

/// Fine-grained role → resource → action grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGrant {
    pub role: Role,
    pub resource: String,
    pub action: Action,
    pub allowed: bool,
}

/// A malformed grant write, rejected before anything reaches the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantSpecError {
    #[error("action name must not be empty")]
    EmptyAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("role name must not be empty")]
    EmptyRole,

    #[error("resource name must not be empty")]
    EmptyResource,

    #[error("unknown resource '{0}'")]
    UnknownResource(String),
}

/// Raw, unvalidated grant request as received from an administrative surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSpec {
    pub role: String,
    pub resource: String,
    /// `None` targets the resource-tier grant.
    pub action: Option<String>,
    pub allowed: bool,
}

/// A validated grant, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedGrant {
    Resource(ResourceGrant),
    Action(ActionGrant),
}

impl ValidatedGrant {
    pub fn role(&self) -> &Role {
        match self {
            ValidatedGrant::Resource(g) => &g.role,
            ValidatedGrant::Action(g) => &g.role,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            ValidatedGrant::Resource(g) => &g.resource,
            ValidatedGrant::Action(g) => &g.resource,
        }
    }

    pub fn allowed(&self) -> bool {
        match self {
            ValidatedGrant::Resource(g) => g.allowed,
            ValidatedGrant::Action(g) => g.allowed,
        }
    }

    /// Stable key used as the audit record id for grant changes.
    pub fn audit_key(&self) -> String {
        match self {
            ValidatedGrant::Resource(g) => format!("{}:{}", g.role, g.resource),
            ValidatedGrant::Action(g) => format!("{}:{}:{}", g.role, g.resource, g.action),
        }
    }
}

impl GrantSpec {
    /// Validate shape and resource existence.
    ///
    /// `resource_exists` is answered by the caller from a read it already
    /// holds; no write is attempted for an invalid spec.
    pub fn validate<F>(&self, resource_exists: F) -> Result<ValidatedGrant, GrantSpecError>
    where
        F: Fn(&str) -> bool,
    {
        let role = self.role.trim();
        if role.is_empty() {
            return Err(GrantSpecError::EmptyRole);
        }
        let resource = self.resource.trim();
        if resource.is_empty() {
            return Err(GrantSpecError::EmptyResource);
        }
        let action = self.action.as_deref().map(Action::from_str).transpose()?;
        if !resource_exists(resource) {
            return Err(GrantSpecError::UnknownResource(resource.to_string()));
        }

        let role = Role::new(role.to_string());
        let resource = resource.to_string();
        Ok(match action {
            Some(action) => ValidatedGrant::Action(ActionGrant {
                role,
                resource,
                action,
                allowed: self.allowed,
            }),
            None => ValidatedGrant::Resource(ResourceGrant {
                role,
                resource,
                allowed: self.allowed,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(action: Option<&str>) -> GrantSpec {
        GrantSpec {
            role: "teacher".to_string(),
            resource: "students".to_string(),
            action: action.map(str::to_string),
            allowed: true,
        }
    }

    #[test]
    fn parses_snake_case_actions() {
        assert_eq!("bulk_update".parse::<Action>().unwrap(), Action::BulkUpdate);
        assert_eq!(" view ".parse::<Action>().unwrap(), Action::View);
        assert_eq!("".parse::<Action>().unwrap_err(), GrantSpecError::EmptyAction);
        assert!(matches!(
            "approve".parse::<Action>(),
            Err(GrantSpecError::UnknownAction(a)) if a == "approve"
        ));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Action::BulkUpdate).unwrap();
        assert_eq!(json, "\"bulk_update\"");
    }

    #[test]
    fn validate_action_grant() {
        let grant = spec(Some("delete")).validate(|_| true).unwrap();
        match grant {
            ValidatedGrant::Action(g) => {
                assert_eq!(g.action, Action::Delete);
                assert_eq!(g.role.as_str(), "teacher");
            }
            other => panic!("expected action grant, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_missing_resource() {
        let err = spec(None).validate(|_| false).unwrap_err();
        assert_eq!(err, GrantSpecError::UnknownResource("students".to_string()));
    }

    #[test]
    fn validate_rejects_empty_action_before_resource_lookup() {
        let err = spec(Some(" "))
            .validate(|_| panic!("resource lookup must not run"))
            .unwrap_err();
        assert_eq!(err, GrantSpecError::EmptyAction);
    }

    #[test]
    fn audit_key_identifies_the_grant() {
        let grant = spec(Some("export")).validate(|_| true).unwrap();
        assert_eq!(grant.audit_key(), "teacher:students:export");
    }
}

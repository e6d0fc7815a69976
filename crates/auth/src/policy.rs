//! Three-tier permission decision.
//!
//! This is the only place that knows about the superuser role. Every other
//! component (resolver service, menu composer, capability matrix) asks this
//! module, so "who can do X" is answered by reading one function.
//!
//! Tiers, first decisive wins:
//!
//! 1. an action-tier grant for `(role, resource, action)` is authoritative,
//!    including an explicit deny;
//! 2. otherwise `view` falls back to the resource-tier grant;
//! 3. otherwise non-view actions are denied unless the role is the superuser
//!    and holds resource-tier access;
//! 4. with no grant rows at all for the pair, only the superuser passes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::{Action, Role};

/// Which tier produced a decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ActionGrant,
    ResourceGrantView,
    ResourceGrantNonView,
    NoGrants,
}

/// An authorization decision with the tier that produced it.
///
/// The tier is for logs and operators only; end users see a plain denial.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub tier: Tier,
}

/// Permission policy: the superuser role plus the tier rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPolicy {
    superuser: Role,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new(Role::admin())
    }
}

impl PermissionPolicy {
    pub fn new(superuser: Role) -> Self {
        Self { superuser }
    }

    pub fn superuser(&self) -> &Role {
        &self.superuser
    }

    pub fn is_superuser(&self, role: &Role) -> bool {
        role == &self.superuser
    }

    /// Decide from the grant rows that exist for one `(role, resource)` pair.
    pub fn decide(
        &self,
        role: &Role,
        action: Action,
        action_grant: Option<bool>,
        resource_grant: Option<bool>,
    ) -> Decision {
        if let Some(allowed) = action_grant {
            return Decision {
                allowed,
                tier: Tier::ActionGrant,
            };
        }

        match resource_grant {
            Some(allowed) if action == Action::View => Decision {
                allowed,
                tier: Tier::ResourceGrantView,
            },
            Some(allowed) => Decision {
                allowed: allowed && self.is_superuser(role),
                tier: Tier::ResourceGrantNonView,
            },
            None => Decision {
                allowed: self.is_superuser(role),
                tier: Tier::NoGrants,
            },
        }
    }

    /// Build the full capability matrix for a role from one bulk snapshot.
    pub fn matrix(&self, grants: &RoleGrants) -> PermissionMatrix {
        let mut names: BTreeSet<&str> = grants.resources.iter().map(String::as_str).collect();
        names.extend(grants.resource_grants.keys().map(String::as_str));
        names.extend(grants.action_grants.keys().map(|(r, _)| r.as_str()));

        let entries = names
            .into_iter()
            .map(|resource| {
                let actions = Action::ALL
                    .into_iter()
                    .map(|action| {
                        let decision = self.decide(
                            &grants.role,
                            action,
                            grants.action_grant(resource, action),
                            grants.resource_grant(resource),
                        );
                        (action, decision.allowed)
                    })
                    .collect();
                (resource.to_string(), actions)
            })
            .collect();

        PermissionMatrix {
            role: grants.role.clone(),
            fallback: self.decide(&grants.role, Action::View, None, None).allowed,
            entries,
        }
    }
}

/// Every grant row that concerns one role, loaded in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrants {
    pub role: Role,
    /// All known resource names (so resources without grants still appear).
    pub resources: Vec<String>,
    pub resource_grants: HashMap<String, bool>,
    pub action_grants: HashMap<(String, Action), bool>,
}

impl RoleGrants {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            resources: Vec::new(),
            resource_grants: HashMap::new(),
            action_grants: HashMap::new(),
        }
    }

    pub fn resource_grant(&self, resource: &str) -> Option<bool> {
        self.resource_grants.get(resource).copied()
    }

    pub fn action_grant(&self, resource: &str, action: Action) -> Option<bool> {
        self.action_grants
            .get(&(resource.to_string(), action))
            .copied()
    }
}

/// `{resource: {action: allowed}}` for a single role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionMatrix {
    role: Role,
    /// Answer for resources with no rows at all (tier 4).
    fallback: bool,
    entries: BTreeMap<String, BTreeMap<Action, bool>>,
}

impl PermissionMatrix {
    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn allows(&self, resource: &str, action: Action) -> bool {
        self.entries
            .get(resource)
            .and_then(|actions| actions.get(&action).copied())
            .unwrap_or(self.fallback)
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn actions_for(&self, resource: &str) -> Option<&BTreeMap<Action, bool>> {
        self.entries.get(resource)
    }

    pub fn into_inner(self) -> BTreeMap<String, BTreeMap<Action, bool>> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn teacher() -> Role {
        Role::new("teacher")
    }

    #[test]
    fn explicit_action_deny_overrides_resource_grant() {
        let policy = PermissionPolicy::default();
        let d = policy.decide(&Role::admin(), Action::View, Some(false), Some(true));
        assert_eq!(
            d,
            Decision {
                allowed: false,
                tier: Tier::ActionGrant
            }
        );
    }

    #[test]
    fn resource_grant_implies_view_only_for_ordinary_roles() {
        let policy = PermissionPolicy::default();
        assert!(policy.decide(&teacher(), Action::View, None, Some(true)).allowed);
        assert!(!policy.decide(&teacher(), Action::Delete, None, Some(true)).allowed);
    }

    #[test]
    fn superuser_with_resource_grant_gets_every_action() {
        let policy = PermissionPolicy::default();
        for action in Action::ALL {
            assert!(policy.decide(&Role::admin(), action, None, Some(true)).allowed);
        }
    }

    #[test]
    fn superuser_with_denied_resource_grant_is_denied() {
        let policy = PermissionPolicy::default();
        assert!(!policy.decide(&Role::admin(), Action::Update, None, Some(false)).allowed);
        assert!(!policy.decide(&Role::admin(), Action::View, None, Some(false)).allowed);
    }

    #[test]
    fn no_grants_fails_closed_except_superuser() {
        let policy = PermissionPolicy::default();
        for action in Action::ALL {
            assert!(!policy.decide(&teacher(), action, None, None).allowed);
            assert!(policy.decide(&Role::admin(), action, None, None).allowed);
        }
    }

    #[test]
    fn configured_superuser_replaces_admin() {
        let policy = PermissionPolicy::new(Role::new("root"));
        assert!(policy.decide(&Role::new("root"), Action::Export, None, None).allowed);
        assert!(!policy.decide(&Role::admin(), Action::Export, None, None).allowed);
    }

    #[test]
    fn matrix_lists_resources_without_grants() {
        let policy = PermissionPolicy::default();
        let mut grants = RoleGrants::new(teacher());
        grants.resources = vec!["students".into(), "reports".into()];
        grants.resource_grants.insert("students".into(), true);

        let matrix = policy.matrix(&grants);
        assert!(matrix.allows("students", Action::View));
        assert!(!matrix.allows("students", Action::Delete));
        assert!(!matrix.allows("reports", Action::View));
        assert!(!matrix.allows("unknown", Action::View));
        assert_eq!(matrix.resources().collect::<Vec<_>>(), vec!["reports", "students"]);
    }

    #[test]
    fn fresh_role_grants_are_empty_and_deny() {
        let grants = RoleGrants::new(teacher());
        assert_eq!(grants.role, teacher());
        assert!(grants.resources.is_empty());
        assert_eq!(grants.resource_grant("students"), None);
        assert_eq!(grants.action_grant("students", Action::View), None);
        assert!(!PermissionPolicy::default().matrix(&grants).allows("students", Action::View));
    }

    fn action_strategy() -> impl Strategy<Value = Action> {
        prop::sample::select(Action::ALL.to_vec())
    }

    fn grants_strategy() -> impl Strategy<Value = RoleGrants> {
        let resource = prop::sample::select(vec!["students", "schools", "reports", "surveys"]);
        (
            prop::sample::select(vec!["admin", "director", "teacher"]),
            prop::collection::hash_map(resource.clone().prop_map(String::from), any::<bool>(), 0..4),
            prop::collection::hash_map(
                (resource.prop_map(String::from), action_strategy()),
                any::<bool>(),
                0..12,
            ),
        )
            .prop_map(|(role, resource_grants, action_grants)| RoleGrants {
                role: Role::new(role),
                resources: vec!["students".into(), "schools".into()],
                resource_grants,
                action_grants,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the bulk matrix agrees with single decisions for every pair.
        #[test]
        fn matrix_matches_single_decisions(grants in grants_strategy(), action in action_strategy()) {
            let policy = PermissionPolicy::default();
            let matrix = policy.matrix(&grants);
            for resource in ["students", "schools", "reports", "surveys", "missing"] {
                let single = policy.decide(
                    &grants.role,
                    action,
                    grants.action_grant(resource, action),
                    grants.resource_grant(resource),
                );
                prop_assert_eq!(matrix.allows(resource, action), single.allowed);
            }
        }

        /// Property: an explicit action grant always decides, whatever the resource grant says.
        #[test]
        fn action_grant_is_authoritative(
            role in prop::sample::select(vec!["admin", "teacher"]),
            action in action_strategy(),
            explicit in any::<bool>(),
            resource_grant in proptest::option::of(any::<bool>()),
        ) {
            let policy = PermissionPolicy::default();
            let d = policy.decide(&Role::new(role), action, Some(explicit), resource_grant);
            prop_assert_eq!(d.allowed, explicit);
            prop_assert_eq!(d.tier, Tier::ActionGrant);
        }
    }
}

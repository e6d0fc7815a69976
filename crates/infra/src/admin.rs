//! Audited grant administration.

use std::collections::HashSet;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{info, instrument};

use edugate_audit::{AuditAction, NewAuditEntry};
use edugate_auth::{AuthorizedActor, GrantSpec, GrantSpecError, ValidatedGrant};
use edugate_core::{DomainError, RecordId};

use crate::recorder::{AuditError, AuditRecorder, abandon};
use crate::store::{AuditStore, PermissionStore, StoreTransaction};

pub const RESOURCE_GRANTS_TABLE: &str = "role_resource_grants";
pub const ACTION_GRANTS_TABLE: &str = "role_action_grants";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("invalid grant: {0}")]
    InvalidGrantSpec(#[from] GrantSpecError),

    #[error("permission store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Outcome of a grant write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantChange {
    pub grant: ValidatedGrant,
    /// Value the row held before, if it existed.
    pub previous: Option<bool>,
}

impl GrantChange {
    pub fn changed(&self) -> bool {
        self.previous != Some(self.grant.allowed())
    }
}

pub struct PermissionAdmin<S> {
    store: S,
    recorder: AuditRecorder<S>,
}

impl<S> PermissionAdmin<S>
where
    S: PermissionStore + AuditStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            recorder: AuditRecorder::new(store.clone()),
            store,
        }
    }

    /// Validate and upsert one grant, auditing it in the same transaction.
    #[instrument(skip(self, by), fields(user_id = %by.actor.id), err)]
    pub async fn set_grant(&self, by: &AuthorizedActor, spec: &GrantSpec) -> Result<GrantChange, AdminError> {
        let resources: HashSet<String> = self
            .store
            .list_resources()
            .await
            .map_err(|e| AdminError::StoreUnavailable(e.to_string()))?
            .into_iter()
            .map(|r| r.name)
            .collect();
        let grant = spec.validate(|name| resources.contains(name))?;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| AdminError::StoreUnavailable(e.to_string()))?;

        let (table, written) = match &grant {
            ValidatedGrant::Resource(g) => (RESOURCE_GRANTS_TABLE, tx.put_resource_grant(g).await),
            ValidatedGrant::Action(g) => (ACTION_GRANTS_TABLE, tx.put_action_grant(g).await),
        };
        let previous = match written {
            Ok(previous) => previous,
            Err(err) => {
                abandon(tx).await;
                return Err(AdminError::StoreUnavailable(err.to_string()));
            }
        };

        let record_id = match RecordId::new(grant.audit_key()) {
            Ok(id) => id,
            Err(err) => {
                abandon(tx).await;
                return Err(err.into());
            }
        };
        let mut entry = NewAuditEntry::for_authorized(
            by,
            if previous.is_some() { AuditAction::Update } else { AuditAction::Create },
            table,
        )
        .record(record_id)
        .after(grant_image(&grant, grant.allowed()))
        .summary(grant_summary(&grant, &by.actor.display_name));
        if let Some(previous) = previous {
            entry = entry.before(grant_image(&grant, previous));
        }

        if let Err(err) = self.recorder.record_change_in(&mut tx, entry).await {
            abandon(tx).await;
            return Err(err.into());
        }
        tx.commit()
            .await
            .map_err(|e| AuditError::AuditWriteFailed {
                transactional: true,
                reason: e.to_string(),
            })?;

        info!(key = %grant.audit_key(), allowed = grant.allowed(), ?previous, "grant written");
        Ok(GrantChange { grant, previous })
    }
}

fn grant_image(grant: &ValidatedGrant, allowed: bool) -> JsonValue {
    match grant {
        ValidatedGrant::Resource(g) => json!({
            "role": g.role,
            "resource": g.resource,
            "allowed": allowed,
        }),
        ValidatedGrant::Action(g) => json!({
            "role": g.role,
            "resource": g.resource,
            "action": g.action,
            "allowed": allowed,
        }),
    }
}

fn grant_summary(grant: &ValidatedGrant, actor: &str) -> String {
    let verb = if grant.allowed() { "granted" } else { "denied" };
    match grant {
        ValidatedGrant::Resource(g) => {
            format!("Access to `{}` {verb} for role {} by {actor}", g.resource, g.role)
        }
        ValidatedGrant::Action(g) => {
            format!("`{}` on `{}` {verb} for role {} by {actor}", g.action, g.resource, g.role)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::PermissionResolver;
    use crate::store::InMemoryStore;
    use edugate_auth::{Action, Actor, PermissionPolicy, Resource, Role};
    use edugate_core::{ResourceId, UserId};

    fn admin_actor() -> AuthorizedActor {
        AuthorizedActor {
            actor: Actor::new(UserId::new(), "Root", Role::admin()),
            resource: "permissions".into(),
            action: Action::Update,
            ip_address: None,
            user_agent: None,
        }
    }

    fn spec(action: Option<&str>, allowed: bool) -> GrantSpec {
        GrantSpec {
            role: "teacher".into(),
            resource: "students".into(),
            action: action.map(str::to_string),
            allowed,
        }
    }

    fn setup() -> (InMemoryStore, PermissionAdmin<InMemoryStore>) {
        let store = InMemoryStore::new();
        store.insert_resource(Resource::new(ResourceId::new(1), "students", "Students"));
        (store.clone(), PermissionAdmin::new(store))
    }

    #[tokio::test]
    async fn grant_write_is_audited_and_takes_effect() {
        let (store, admin) = setup();
        let resolver = PermissionResolver::new(store.clone(), PermissionPolicy::default());
        let teacher = Role::new("teacher");
        assert!(!resolver.can_perform(&teacher, "students", Action::Export).await);

        let change = admin.set_grant(&admin_actor(), &spec(Some("export"), true)).await.unwrap();
        assert_eq!(change.previous, None);
        assert!(resolver.can_perform(&teacher, "students", Action::Export).await);

        let change = admin.set_grant(&admin_actor(), &spec(Some("export"), false)).await.unwrap();
        assert_eq!(change.previous, Some(true));
        assert!(change.changed());

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[1].action, AuditAction::Update);
        assert_eq!(entries[1].table_name, ACTION_GRANTS_TABLE);
        assert_eq!(entries[1].record_id.as_ref().map(RecordId::as_str), Some("teacher:students:export"));
        assert_eq!(entries[1].summary, "`export` on `students` denied for role teacher by Root");
        assert_eq!(entries[1].changes.len(), 1);
    }

    #[tokio::test]
    async fn invalid_specs_write_nothing() {
        let (store, admin) = setup();
        for (bad, expected) in [
            (spec(Some(""), true), GrantSpecError::EmptyAction),
            (spec(Some("archive"), true), GrantSpecError::UnknownAction("archive".into())),
            (
                GrantSpec {
                    resource: "payroll".into(),
                    ..spec(None, true)
                },
                GrantSpecError::UnknownResource("payroll".into()),
            ),
        ] {
            let err = admin.set_grant(&admin_actor(), &bad).await.unwrap_err();
            assert_eq!(err, AdminError::InvalidGrantSpec(expected));
        }
        assert!(store.audit_entries().is_empty());
        assert_eq!(store.stored_resource_grant("teacher", "payroll"), None);
    }

    #[tokio::test]
    async fn audit_failure_leaves_grant_unchanged() {
        let (store, admin) = setup();
        store.fail_audit_writes(true);

        let err = admin.set_grant(&admin_actor(), &spec(None, true)).await.unwrap_err();
        assert!(matches!(err, AdminError::Audit(AuditError::AuditWriteFailed { transactional: true, .. })));
        assert_eq!(store.stored_resource_grant("teacher", "students"), None);
    }
}

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use edugate_audit::{AuditEntry, SoftDeleteMarker};
use edugate_auth::{Action, ActionGrant, Resource, ResourceGrant, Role, RoleGrants};
use edugate_core::{RecordId, ResourceId, UserId};
use edugate_menu::{ConditionRow, MenuEntry, UserMenuCustomization};

/// Permission/audit store operation error.
///
/// These are **infrastructure errors**. Callers on the authorization path
/// treat every variant as a denial.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the operation failed in transit.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a write (constraint, missing row, ...).
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// A concurrent transaction changed a row this one read.
    #[error("concurrent update: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Read side of the permission tables, plus resource lookups.
///
/// The store is read-mostly and read concurrently without coordination.
/// Grant writes go through [`StoreTransaction`] so they are audited in the
/// same transaction.
#[async_trait::async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    /// Action-tier row for the triple, if one exists.
    async fn action_grant(
        &self,
        role: &Role,
        resource: &str,
        action: Action,
    ) -> Result<Option<bool>, StoreError>;

    /// Resource-tier row for the pair, if one exists.
    async fn resource_grant(&self, role: &Role, resource: &str) -> Result<Option<bool>, StoreError>;

    /// Every grant row for a role plus all resource names, in one pass.
    async fn role_grants(&self, role: &Role) -> Result<RoleGrants, StoreError>;
}

/// Menu metadata and the per-user overlay.
#[async_trait::async_trait]
pub trait MenuStore: Send + Sync {
    /// All resources joined with this user's customization row (if any).
    async fn menu_entries(&self, user_id: UserId) -> Result<Vec<MenuEntry>, StoreError>;

    async fn display_conditions(&self) -> Result<Vec<ConditionRow>, StoreError>;

    async fn customization(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
    ) -> Result<Option<UserMenuCustomization>, StoreError>;

    /// Insert or update in place.
    async fn save_customization(&self, customization: &UserMenuCustomization) -> Result<(), StoreError>;

    async fn delete_customization(&self, user_id: UserId, resource_id: ResourceId) -> Result<bool, StoreError>;
}

/// Audit trail persistence with transactional writes.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    type Tx: StoreTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Audit entries for one record, in write order.
    async fn entries_for_record(&self, table: &str, record_id: &RecordId) -> Result<Vec<AuditEntry>, StoreError>;
}

/// One atomic unit of work: domain mutations and their audit entries commit
/// or roll back together. Dropping without commit rolls back.
#[async_trait::async_trait]
pub trait StoreTransaction: Send {
    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Current image of a domain row, soft-deleted or not. The row stays
    /// locked against other writers until this transaction ends.
    async fn load_row(&mut self, table: &str, record_id: &RecordId) -> Result<Option<JsonValue>, StoreError>;

    /// `Some` sets the soft-delete marker, `None` clears it. Returns whether
    /// a row changed state; a row already in the requested state is left
    /// untouched and reports `false`.
    async fn write_soft_delete(
        &mut self,
        table: &str,
        record_id: &RecordId,
        marker: Option<&SoftDeleteMarker>,
    ) -> Result<bool, StoreError>;

    /// Upsert; returns the previous value.
    async fn put_resource_grant(&mut self, grant: &ResourceGrant) -> Result<Option<bool>, StoreError>;

    /// Upsert; returns the previous value.
    async fn put_action_grant(&mut self, grant: &ActionGrant) -> Result<Option<bool>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    async fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

#[async_trait::async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        (**self).find_resource(name).await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        (**self).list_resources().await
    }

    async fn action_grant(
        &self,
        role: &Role,
        resource: &str,
        action: Action,
    ) -> Result<Option<bool>, StoreError> {
        (**self).action_grant(role, resource, action).await
    }

    async fn resource_grant(&self, role: &Role, resource: &str) -> Result<Option<bool>, StoreError> {
        (**self).resource_grant(role, resource).await
    }

    async fn role_grants(&self, role: &Role) -> Result<RoleGrants, StoreError> {
        (**self).role_grants(role).await
    }
}

#[async_trait::async_trait]
impl<S> MenuStore for Arc<S>
where
    S: MenuStore + ?Sized,
{
    async fn menu_entries(&self, user_id: UserId) -> Result<Vec<MenuEntry>, StoreError> {
        (**self).menu_entries(user_id).await
    }

    async fn display_conditions(&self) -> Result<Vec<ConditionRow>, StoreError> {
        (**self).display_conditions().await
    }

    async fn customization(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
    ) -> Result<Option<UserMenuCustomization>, StoreError> {
        (**self).customization(user_id, resource_id).await
    }

    async fn save_customization(&self, customization: &UserMenuCustomization) -> Result<(), StoreError> {
        (**self).save_customization(customization).await
    }

    async fn delete_customization(&self, user_id: UserId, resource_id: ResourceId) -> Result<bool, StoreError> {
        (**self).delete_customization(user_id, resource_id).await
    }
}

#[async_trait::async_trait]
impl<S> AuditStore for Arc<S>
where
    S: AuditStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }

    async fn entries_for_record(&self, table: &str, record_id: &RecordId) -> Result<Vec<AuditEntry>, StoreError> {
        (**self).entries_for_record(table, record_id).await
    }
}

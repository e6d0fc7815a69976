//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique / foreign key / check violation) | `23505` / `23503` / `23514` | `WriteRejected` |
//! | Database (undefined table / column) | `42P01` / `42703` | `InvalidData` |
//! | Database (other) | any | `Unavailable` |
//! | Decode / ColumnDecode | N/A | `InvalidData` |
//! | PoolClosed, Io, timeouts, other | N/A | `Unavailable` |
//!
//! Domain tables touched by soft delete are addressed by name, so the name
//! is validated as a plain identifier before it is spliced into SQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use edugate_audit::{AuditAction, AuditEntry, FieldChange, SoftDeleteMarker};
use edugate_auth::{Action, ActionGrant, MenuVisibility, Resource, ResourceGrant, Role, RoleGrants};
use edugate_core::{AuditEntryId, RecordId, ResourceId, UserId};
use edugate_menu::{ConditionRow, MenuEntry, UserMenuCustomization};

use super::r#trait::{AuditStore, MenuStore, PermissionStore, StoreError, StoreTransaction};

const RESOURCE_COLUMNS: &str = "r.id, r.name, r.parent_id, r.level, r.sort_order, r.label, \
     r.localized_label, r.icon, r.route, r.badge, r.css_class, r.is_displayed_in_menu, \
     r.menu_visibility, r.menu_group";

const AUDIT_COLUMNS: &str = "id, actor_id, actor_name, actor_role, action, table_name, record_id, \
     old_data, new_data, changes, summary, ip_address, user_agent, is_soft_delete, created_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect with default pool settings.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PermissionStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE r.name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_resource", e))?;
        row.as_ref().map(resource_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources r ORDER BY r.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_resources", e))?;
        rows.iter().map(resource_from_row).collect()
    }

    #[instrument(skip(self), fields(role = %role, action = action.as_str()), err)]
    async fn action_grant(
        &self,
        role: &Role,
        resource: &str,
        action: Action,
    ) -> Result<Option<bool>, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT allowed FROM role_action_grants
            WHERE role = $1 AND resource = $2 AND action = $3
            "#,
        )
        .bind(role.as_str())
        .bind(resource)
        .bind(action.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("action_grant", e))
    }

    #[instrument(skip(self), fields(role = %role), err)]
    async fn resource_grant(&self, role: &Role, resource: &str) -> Result<Option<bool>, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT allowed FROM role_resource_grants WHERE role = $1 AND resource = $2",
        )
        .bind(role.as_str())
        .bind(resource)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resource_grant", e))
    }

    #[instrument(skip(self), fields(role = %role), err)]
    async fn role_grants(&self, role: &Role) -> Result<RoleGrants, StoreError> {
        let mut grants = RoleGrants::new(role.clone());

        grants.resources = sqlx::query_scalar::<_, String>("SELECT name FROM resources ORDER BY name")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_grants.resources", e))?;

        let rows = sqlx::query("SELECT resource, allowed FROM role_resource_grants WHERE role = $1")
            .bind(role.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_grants.resource_grants", e))?;
        for row in rows {
            let resource: String = row.try_get("resource").map_err(decode_err)?;
            let allowed: bool = row.try_get("allowed").map_err(decode_err)?;
            grants.resource_grants.insert(resource, allowed);
        }

        let rows = sqlx::query("SELECT resource, action, allowed FROM role_action_grants WHERE role = $1")
            .bind(role.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_grants.action_grants", e))?;
        for row in rows {
            let resource: String = row.try_get("resource").map_err(decode_err)?;
            let action: String = row.try_get("action").map_err(decode_err)?;
            let allowed: bool = row.try_get("allowed").map_err(decode_err)?;
            // Rows for actions this build doesn't know are ignored.
            if let Ok(action) = action.parse::<Action>() {
                grants.action_grants.insert((resource, action), allowed);
            }
        }

        Ok(grants)
    }
}

#[async_trait::async_trait]
impl MenuStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn menu_entries(&self, user_id: UserId) -> Result<Vec<MenuEntry>, StoreError> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS}, c.user_id AS c_user_id, c.is_hidden, c.is_pinned, \
             c.custom_label, c.custom_order, c.updated_at AS c_updated_at \
             FROM resources r \
             LEFT JOIN user_menu_customizations c ON c.resource_id = r.id AND c.user_id = $1 \
             ORDER BY r.id"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("menu_entries", e))?;

        rows.iter()
            .map(|row| {
                let resource = resource_from_row(row)?;
                let joined: Option<uuid::Uuid> = row.try_get("c_user_id").map_err(decode_err)?;
                let customization = match joined {
                    Some(uid) => Some(UserMenuCustomization {
                        user_id: UserId::from_uuid(uid),
                        resource_id: resource.id,
                        is_hidden: row.try_get("is_hidden").map_err(decode_err)?,
                        is_pinned: row.try_get("is_pinned").map_err(decode_err)?,
                        custom_label: row.try_get("custom_label").map_err(decode_err)?,
                        custom_order: row.try_get("custom_order").map_err(decode_err)?,
                        updated_at: row.try_get("c_updated_at").map_err(decode_err)?,
                    }),
                    None => None,
                };
                Ok(MenuEntry { resource, customization })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn display_conditions(&self) -> Result<Vec<ConditionRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT resource_id, condition_type, operator, value FROM resource_display_conditions ORDER BY id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("display_conditions", e))?;

        rows.iter()
            .map(|row| {
                Ok(ConditionRow {
                    resource_id: ResourceId::new(row.try_get("resource_id").map_err(decode_err)?),
                    condition_type: row.try_get("condition_type").map_err(decode_err)?,
                    operator: row.try_get("operator").map_err(decode_err)?,
                    value: row.try_get("value").map_err(decode_err)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id, resource_id = %resource_id), err)]
    async fn customization(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
    ) -> Result<Option<UserMenuCustomization>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT is_hidden, is_pinned, custom_label, custom_order, updated_at
            FROM user_menu_customizations
            WHERE user_id = $1 AND resource_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(resource_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("customization", e))?;

        row.map(|row| {
            Ok(UserMenuCustomization {
                user_id,
                resource_id,
                is_hidden: row.try_get("is_hidden").map_err(decode_err)?,
                is_pinned: row.try_get("is_pinned").map_err(decode_err)?,
                custom_label: row.try_get("custom_label").map_err(decode_err)?,
                custom_order: row.try_get("custom_order").map_err(decode_err)?,
                updated_at: row.try_get("updated_at").map_err(decode_err)?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, customization), fields(user_id = %customization.user_id), err)]
    async fn save_customization(&self, customization: &UserMenuCustomization) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_menu_customizations
                (user_id, resource_id, is_hidden, is_pinned, custom_label, custom_order, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, resource_id) DO UPDATE SET
                is_hidden = EXCLUDED.is_hidden,
                is_pinned = EXCLUDED.is_pinned,
                custom_label = EXCLUDED.custom_label,
                custom_order = EXCLUDED.custom_order,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(customization.user_id.as_uuid())
        .bind(customization.resource_id.get())
        .bind(customization.is_hidden)
        .bind(customization.is_pinned)
        .bind(customization.custom_label.as_deref())
        .bind(customization.custom_order)
        .bind(customization.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_customization", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, resource_id = %resource_id), err)]
    async fn delete_customization(&self, user_id: UserId, resource_id: ResourceId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_menu_customizations WHERE user_id = $1 AND resource_id = $2")
            .bind(user_id.as_uuid())
            .bind(resource_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_customization", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl AuditStore for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTransaction { tx })
    }

    #[instrument(skip(self), fields(record_id = %record_id), err)]
    async fn entries_for_record(&self, table: &str, record_id: &RecordId) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs \
             WHERE table_name = $1 AND record_id = $2 \
             ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(table)
            .bind(record_id.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("entries_for_record", e))?;
        rows.iter().map(audit_entry_from_row).collect()
    }
}

/// A live Postgres transaction. Dropping it without commit rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// Underlying transaction, for callers that run their own domain
    /// statements in the same unit of work.
    pub fn transaction_mut(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait::async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        let changes = serde_json::to_value(&entry.changes)
            .map_err(|e| StoreError::InvalidData(format!("failed to encode changes: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_id, actor_name, actor_role, action, table_name, record_id,
                old_data, new_data, changes, summary, ip_address, user_agent,
                is_soft_delete, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.actor_id.as_uuid())
        .bind(&entry.actor_name)
        .bind(entry.actor_role.as_str())
        .bind(entry.action.as_str())
        .bind(&entry.table_name)
        .bind(entry.record_id.as_ref().map(RecordId::as_str))
        .bind(&entry.old_data)
        .bind(&entry.new_data)
        .bind(changes)
        .bind(&entry.summary)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.is_soft_delete)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_audit_entry", e))?;
        Ok(())
    }

    async fn load_row(&mut self, table: &str, record_id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        let table = checked_identifier(table)?;
        let sql = format!("SELECT to_jsonb(t) AS image FROM {table} t WHERE t.id::text = $1 FOR UPDATE");
        sqlx::query_scalar::<_, JsonValue>(&sql)
            .bind(record_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_row", e))
    }

    async fn write_soft_delete(
        &mut self,
        table: &str,
        record_id: &RecordId,
        marker: Option<&SoftDeleteMarker>,
    ) -> Result<bool, StoreError> {
        let sql = soft_delete_sql(checked_identifier(table)?);
        let result = sqlx::query(&sql)
            .bind(record_id.as_str())
            .bind(marker.is_some())
            .bind(marker.map(|m| m.deleted_at))
            .bind(marker.map(|m| *m.deleted_by.as_uuid()))
            .bind(marker.and_then(|m| m.delete_reason.as_deref()))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("write_soft_delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_resource_grant(&mut self, grant: &ResourceGrant) -> Result<Option<bool>, StoreError> {
        let previous = sqlx::query_scalar::<_, bool>(
            "SELECT allowed FROM role_resource_grants WHERE role = $1 AND resource = $2 FOR UPDATE",
        )
        .bind(grant.role.as_str())
        .bind(&grant.resource)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_resource_grant.select", e))?;

        sqlx::query(
            r#"
            INSERT INTO role_resource_grants (role, resource, allowed)
            VALUES ($1, $2, $3)
            ON CONFLICT (role, resource) DO UPDATE SET allowed = EXCLUDED.allowed
            "#,
        )
        .bind(grant.role.as_str())
        .bind(&grant.resource)
        .bind(grant.allowed)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_resource_grant.upsert", e))?;

        Ok(previous)
    }

    async fn put_action_grant(&mut self, grant: &ActionGrant) -> Result<Option<bool>, StoreError> {
        let previous = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT allowed FROM role_action_grants
            WHERE role = $1 AND resource = $2 AND action = $3
            FOR UPDATE
            "#,
        )
        .bind(grant.role.as_str())
        .bind(&grant.resource)
        .bind(grant.action.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_action_grant.select", e))?;

        sqlx::query(
            r#"
            INSERT INTO role_action_grants (role, resource, action, allowed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (role, resource, action) DO UPDATE SET allowed = EXCLUDED.allowed
            "#,
        )
        .bind(grant.role.as_str())
        .bind(&grant.resource)
        .bind(grant.action.as_str())
        .bind(grant.allowed)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_action_grant.upsert", e))?;

        Ok(previous)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Accept `[a-z_][a-z0-9_]*` only.
fn checked_identifier(table: &str) -> Result<&str, StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(table)
    } else {
        Err(StoreError::InvalidData(format!("invalid table name '{table}'")))
    }
}

fn resource_from_row(row: &PgRow) -> Result<Resource, StoreError> {
    let parent_id: Option<i64> = row.try_get("parent_id").map_err(decode_err)?;
    let visibility: String = row.try_get("menu_visibility").map_err(decode_err)?;
    Ok(Resource {
        id: ResourceId::new(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        parent_id: parent_id.map(ResourceId::new),
        level: row.try_get("level").map_err(decode_err)?,
        sort_order: row.try_get("sort_order").map_err(decode_err)?,
        label: row.try_get("label").map_err(decode_err)?,
        localized_label: row.try_get("localized_label").map_err(decode_err)?,
        icon: row.try_get("icon").map_err(decode_err)?,
        route: row.try_get("route").map_err(decode_err)?,
        badge: row.try_get("badge").map_err(decode_err)?,
        css_class: row.try_get("css_class").map_err(decode_err)?,
        is_displayed_in_menu: row.try_get("is_displayed_in_menu").map_err(decode_err)?,
        menu_visibility: MenuVisibility::parse_lenient(&visibility),
        menu_group: row.try_get("menu_group").map_err(decode_err)?,
    })
}

fn audit_entry_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let action: String = row.try_get("action").map_err(decode_err)?;
    let action = AuditAction::parse(&action)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown audit action '{action}'")))?;
    let record_id: Option<String> = row.try_get("record_id").map_err(decode_err)?;
    let record_id = record_id
        .map(RecordId::new)
        .transpose()
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
    let changes: JsonValue = row.try_get("changes").map_err(decode_err)?;
    let changes: Vec<FieldChange> = serde_json::from_value(changes)
        .map_err(|e| StoreError::InvalidData(format!("failed to decode changes: {e}")))?;
    let actor_role: String = row.try_get("actor_role").map_err(decode_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_err)?;

    Ok(AuditEntry {
        id: AuditEntryId::from_uuid(row.try_get("id").map_err(decode_err)?),
        actor_id: UserId::from_uuid(row.try_get("actor_id").map_err(decode_err)?),
        actor_name: row.try_get("actor_name").map_err(decode_err)?,
        actor_role: Role::new(actor_role),
        action,
        table_name: row.try_get("table_name").map_err(decode_err)?,
        record_id,
        old_data: row.try_get("old_data").map_err(decode_err)?,
        new_data: row.try_get("new_data").map_err(decode_err)?,
        changes,
        summary: row.try_get("summary").map_err(decode_err)?,
        ip_address: row.try_get("ip_address").map_err(decode_err)?,
        user_agent: row.try_get("user_agent").map_err(decode_err)?,
        is_soft_delete: row.try_get("is_soft_delete").map_err(decode_err)?,
        created_at,
    })
}

/// Touches only the marker columns, and only when the row is not already in
/// the requested state.
fn soft_delete_sql(table: &str) -> String {
    format!(
        "UPDATE {table} SET is_deleted = $2, deleted_at = $3, deleted_by = $4, delete_reason = $5 \
         WHERE id::text = $1 AND is_deleted IS DISTINCT FROM $2"
    )
}

fn decode_err(err: sqlx::Error) -> StoreError {
    StoreError::InvalidData(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to store errors.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => StoreError::WriteRejected(msg),
                Some("42P01") | Some("42703") => StoreError::InvalidData(msg),
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::Decode(e) => StoreError::InvalidData(format!("decode error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::InvalidData(format!("column {index} decode error in {operation}: {source}"))
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        other => StoreError::Unavailable(format!("{operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_must_be_plain_identifiers() {
        assert!(checked_identifier("teachers").is_ok());
        assert!(checked_identifier("class_sections_2024").is_ok());
        assert!(checked_identifier("Teachers").is_err());
        assert!(checked_identifier("teachers; drop table x").is_err());
        assert!(checked_identifier("").is_err());
        assert!(checked_identifier("1teachers").is_err());
    }

    #[test]
    fn soft_delete_update_sets_only_marker_columns() {
        let sql = soft_delete_sql("teachers");
        assert!(sql.starts_with("UPDATE teachers SET is_deleted = $2"));
        assert!(!sql.contains("updated_at"));
        assert!(sql.ends_with("AND is_deleted IS DISTINCT FROM $2"));
    }

    #[test]
    fn pool_closed_is_unavailable() {
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
    }
}

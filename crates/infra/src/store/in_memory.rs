use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value as JsonValue;

use edugate_audit::{AuditEntry, SoftDeleteMarker, is_soft_deleted};
use edugate_auth::{Action, ActionGrant, Resource, ResourceGrant, Role, RoleGrants};
use edugate_core::{RecordId, ResourceId, UserId};
use edugate_menu::{ConditionRow, MenuEntry, UserMenuCustomization};

use super::r#trait::{AuditStore, MenuStore, PermissionStore, StoreError, StoreTransaction};

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<ResourceId, Resource>,
    resource_grants: HashMap<(Role, String), bool>,
    action_grants: HashMap<(Role, String, Action), bool>,
    conditions: Vec<ConditionRow>,
    customizations: HashMap<(UserId, ResourceId), UserMenuCustomization>,
    audit: Vec<AuditEntry>,
    records: HashMap<String, BTreeMap<RecordId, JsonValue>>,
}

impl State {
    fn row(&self, table: &str, id: &RecordId) -> Option<JsonValue> {
        self.records.get(table).and_then(|rows| rows.get(id)).cloned()
    }
}

/// Switches for simulating infrastructure failures in tests.
#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_audit_writes: AtomicBool,
    fail_row_updates: AtomicBool,
    read_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<State>,
    faults: Faults,
}

/// In-memory permission, menu and audit store.
///
/// Intended for tests/dev. Cloning shares the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── seeding ────────────────────────────────────────────────────────────

    pub fn insert_resource(&self, resource: Resource) {
        if let Ok(mut state) = self.inner.state.write() {
            state.resources.insert(resource.id, resource);
        }
    }

    pub fn grant_resource(&self, role: &str, resource: &str, allowed: bool) {
        if let Ok(mut state) = self.inner.state.write() {
            state
                .resource_grants
                .insert((Role::from(role), resource.to_string()), allowed);
        }
    }

    pub fn grant_action(&self, role: &str, resource: &str, action: Action, allowed: bool) {
        if let Ok(mut state) = self.inner.state.write() {
            state
                .action_grants
                .insert((Role::from(role), resource.to_string(), action), allowed);
        }
    }

    pub fn add_condition(&self, row: ConditionRow) {
        if let Ok(mut state) = self.inner.state.write() {
            state.conditions.push(row);
        }
    }

    pub fn insert_record(&self, table: &str, id: RecordId, image: JsonValue) {
        if let Ok(mut state) = self.inner.state.write() {
            state.records.entry(table.to_string()).or_default().insert(id, image);
        }
    }

    // ── inspection ─────────────────────────────────────────────────────────

    /// Raw row image, including soft-deleted rows.
    pub fn record(&self, table: &str, id: &RecordId) -> Option<JsonValue> {
        self.inner.state.read().ok()?.row(table, id)
    }

    /// Rows visible to normal reads (soft-deleted rows excluded).
    pub fn active_records(&self, table: &str) -> Vec<JsonValue> {
        let Ok(state) = self.inner.state.read() else {
            return vec![];
        };
        state
            .records
            .get(table)
            .map(|rows| rows.values().filter(|r| !is_soft_deleted(r)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner
            .state
            .read()
            .map(|s| s.audit.clone())
            .unwrap_or_default()
    }

    pub fn stored_resource_grant(&self, role: &str, resource: &str) -> Option<bool> {
        let state = self.inner.state.read().ok()?;
        state
            .resource_grants
            .get(&(Role::from(role), resource.to_string()))
            .copied()
    }

    pub fn stored_action_grant(&self, role: &str, resource: &str, action: Action) -> Option<bool> {
        let state = self.inner.state.read().ok()?;
        state
            .action_grants
            .get(&(Role::from(role), resource.to_string(), action))
            .copied()
    }

    // ── fault injection ────────────────────────────────────────────────────

    /// Every operation fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Audit inserts fail; other writes still succeed.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.inner.faults.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Soft-delete/restore row updates fail.
    pub fn fail_row_updates(&self, fail: bool) {
        self.inner.faults.fail_row_updates.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every permission/menu read.
    pub fn set_read_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.faults.read_delay_ms.store(ms, Ordering::SeqCst);
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        let delay = self.inner.faults.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PermissionStore for InMemoryStore {
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.resources.values().find(|r| r.name == name).cloned())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.resources.values().cloned().collect())
    }

    async fn action_grant(
        &self,
        role: &Role,
        resource: &str,
        action: Action,
    ) -> Result<Option<bool>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .action_grants
            .get(&(role.clone(), resource.to_string(), action))
            .copied())
    }

    async fn resource_grant(&self, role: &Role, resource: &str) -> Result<Option<bool>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .resource_grants
            .get(&(role.clone(), resource.to_string()))
            .copied())
    }

    async fn role_grants(&self, role: &Role) -> Result<RoleGrants, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;

        let mut grants = RoleGrants::new(role.clone());
        grants.resources = state.resources.values().map(|r| r.name.clone()).collect();
        for ((r, resource), allowed) in &state.resource_grants {
            if r == role {
                grants.resource_grants.insert(resource.clone(), *allowed);
            }
        }
        for ((r, resource, action), allowed) in &state.action_grants {
            if r == role {
                grants.action_grants.insert((resource.clone(), *action), *allowed);
            }
        }
        Ok(grants)
    }
}

#[async_trait::async_trait]
impl MenuStore for InMemoryStore {
    async fn menu_entries(&self, user_id: UserId) -> Result<Vec<MenuEntry>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .resources
            .values()
            .map(|resource| MenuEntry {
                resource: resource.clone(),
                customization: state.customizations.get(&(user_id, resource.id)).cloned(),
            })
            .collect())
    }

    async fn display_conditions(&self) -> Result<Vec<ConditionRow>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.conditions.clone())
    }

    async fn customization(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
    ) -> Result<Option<UserMenuCustomization>, StoreError> {
        self.before_read().await?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.customizations.get(&(user_id, resource_id)).cloned())
    }

    async fn save_customization(&self, customization: &UserMenuCustomization) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.inner.state.write().map_err(|_| poisoned())?;
        if !state.resources.contains_key(&customization.resource_id) {
            return Err(StoreError::WriteRejected(format!(
                "unknown resource {}",
                customization.resource_id
            )));
        }
        state.customizations.insert(
            (customization.user_id, customization.resource_id),
            customization.clone(),
        );
        Ok(())
    }

    async fn delete_customization(&self, user_id: UserId, resource_id: ResourceId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.inner.state.write().map_err(|_| poisoned())?;
        Ok(state.customizations.remove(&(user_id, resource_id)).is_some())
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.check_available()?;
        Ok(InMemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
            rows: HashMap::new(),
            read_images: HashMap::new(),
        })
    }

    async fn entries_for_record(&self, table: &str, record_id: &RecordId) -> Result<Vec<AuditEntry>, StoreError> {
        self.check_available()?;
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.table_name == table && e.record_id.as_ref() == Some(record_id))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
enum Staged {
    Entry(AuditEntry),
    Row { table: String, id: RecordId, image: JsonValue },
    ResourceGrant(ResourceGrant),
    ActionGrant(ActionGrant),
}

/// Buffered unit of work; nothing is visible to other readers before commit.
///
/// Commit is compare-and-set: it fails with [`StoreError::Conflict`] when a
/// row this transaction read and then rewrote was changed by someone else in
/// the meantime.
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: InMemoryStore,
    staged: Vec<Staged>,
    rows: HashMap<(String, RecordId), JsonValue>,
    /// Committed image of each row at the time this transaction first read it.
    read_images: HashMap<(String, RecordId), Option<JsonValue>>,
}

impl InMemoryTransaction {
    /// Stage a domain row write (the caller's own mutation in this unit of work).
    pub fn stage_row(&mut self, table: &str, id: RecordId, image: JsonValue) {
        self.rows.insert((table.to_string(), id.clone()), image.clone());
        self.staged.push(Staged::Row {
            table: table.to_string(),
            id,
            image,
        });
    }

    fn current_row(&mut self, table: &str, id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        let key = (table.to_string(), id.clone());
        if let Some(row) = self.rows.get(&key) {
            return Ok(Some(row.clone()));
        }
        let committed = {
            let state = self.store.inner.state.read().map_err(|_| poisoned())?;
            state.row(table, id)
        };
        Ok(self.read_images.entry(key).or_insert(committed).clone())
    }
}

#[async_trait::async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.store.check_available()?;
        if self.store.inner.faults.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("audit insert failed".to_string()));
        }
        self.staged.push(Staged::Entry(entry.clone()));
        Ok(())
    }

    async fn load_row(&mut self, table: &str, record_id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        self.store.check_available()?;
        self.current_row(table, record_id)
    }

    async fn write_soft_delete(
        &mut self,
        table: &str,
        record_id: &RecordId,
        marker: Option<&SoftDeleteMarker>,
    ) -> Result<bool, StoreError> {
        self.store.check_available()?;
        if self.store.inner.faults.fail_row_updates.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected(format!("update of {table}/{record_id} failed")));
        }
        let Some(row) = self.current_row(table, record_id)? else {
            return Ok(false);
        };
        if is_soft_deleted(&row) == marker.is_some() {
            return Ok(false);
        }
        let image = match marker {
            Some(marker) => marker.apply_to(&row),
            None => SoftDeleteMarker::clear(&row),
        };
        self.stage_row(table, record_id.clone(), image);
        Ok(true)
    }

    async fn put_resource_grant(&mut self, grant: &ResourceGrant) -> Result<Option<bool>, StoreError> {
        self.store.check_available()?;
        let previous = self.store.stored_resource_grant(grant.role.as_str(), &grant.resource);
        self.staged.push(Staged::ResourceGrant(grant.clone()));
        Ok(previous)
    }

    async fn put_action_grant(&mut self, grant: &ActionGrant) -> Result<Option<bool>, StoreError> {
        self.store.check_available()?;
        let previous = self
            .store
            .stored_action_grant(grant.role.as_str(), &grant.resource, grant.action);
        self.staged.push(Staged::ActionGrant(grant.clone()));
        Ok(previous)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.store.check_available()?;
        let mut state = self.store.inner.state.write().map_err(|_| poisoned())?;
        for ((table, id), seen) in &self.read_images {
            if self.rows.contains_key(&(table.clone(), id.clone())) && state.row(table, id) != *seen {
                return Err(StoreError::Conflict(format!("{table}/{id} changed since it was read")));
            }
        }
        for op in self.staged {
            match op {
                Staged::Entry(entry) => state.audit.push(entry),
                Staged::Row { table, id, image } => {
                    state.records.entry(table).or_default().insert(id, image);
                }
                Staged::ResourceGrant(g) => {
                    state.resource_grants.insert((g.role, g.resource), g.allowed);
                }
                Staged::ActionGrant(g) => {
                    state.action_grants.insert((g.role, g.resource, g.action), g.allowed);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn seeded() -> (InMemoryStore, RecordId) {
        let store = InMemoryStore::new();
        let id = RecordId::from(7_i64);
        store.insert_record("teachers", id.clone(), json!({"id": 7, "is_deleted": false}));
        (store, id)
    }

    fn marker() -> SoftDeleteMarker {
        SoftDeleteMarker::new(UserId::new(), Some("left".into()), Utc::now())
    }

    #[tokio::test]
    async fn stale_row_write_does_not_commit() {
        let (store, id) = seeded();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.load_row("teachers", &id).await.unwrap().is_some());
        assert!(second.load_row("teachers", &id).await.unwrap().is_some());

        assert!(first.write_soft_delete("teachers", &id, Some(&marker())).await.unwrap());
        assert!(second.write_soft_delete("teachers", &id, Some(&marker())).await.unwrap());
        first.commit().await.unwrap();

        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.record("teachers", &id).unwrap()["delete_reason"], json!("left"));
    }

    #[tokio::test]
    async fn marker_write_in_current_state_is_a_no_op() {
        let (store, id) = seeded();
        let mut tx = store.begin().await.unwrap();
        assert!(!tx.write_soft_delete("teachers", &id, None).await.unwrap());
        assert!(tx.write_soft_delete("teachers", &id, Some(&marker())).await.unwrap());
        assert!(!tx.write_soft_delete("teachers", &id, Some(&marker())).await.unwrap());
        tx.commit().await.unwrap();
        assert!(is_soft_deleted(&store.record("teachers", &id).unwrap()));
    }
}

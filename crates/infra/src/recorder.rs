//! Audit recorder: change entries, best-effort read entries, and reversible
//! soft deletion.
//!
//! Mutating entries are written inside a store transaction. When the caller
//! owns the transaction ([`AuditRecorder::record_change_in`]) a failed audit
//! write is returned so the caller rolls back its own mutation too.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use edugate_audit::{
    AuditAction, AuditEntry, Dependents, NewAuditEntry, SoftDeleteMarker, default_summary, is_soft_deleted,
    record_label,
};
use edugate_auth::AuthorizedActor;
use edugate_core::{AuditEntryId, RecordId};

use crate::store::{AuditStore, StoreError, StoreTransaction};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("audit write failed (transactional: {transactional}): {reason}")]
    AuditWriteFailed { transactional: bool, reason: String },
}

impl AuditError {
    fn write_failed(transactional: bool, err: StoreError) -> Self {
        AuditError::AuditWriteFailed {
            transactional,
            reason: err.to_string(),
        }
    }
}

/// Domain-supplied count of rows that still reference a record.
#[async_trait::async_trait]
pub trait DependentCheck: Send + Sync {
    async fn dependents(&self, table: &str, record_id: &RecordId) -> anyhow::Result<Dependents>;
}

/// Check for tables nothing else references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependents;

#[async_trait::async_trait]
impl DependentCheck for NoDependents {
    async fn dependents(&self, _table: &str, _record_id: &RecordId) -> anyhow::Result<Dependents> {
        Ok(Dependents::none())
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecorder<S> {
    store: S,
}

impl<S> AuditRecorder<S>
where
    S: AuditStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write an entry inside the caller's transaction.
    pub async fn record_change_in(
        &self,
        tx: &mut S::Tx,
        entry: NewAuditEntry,
    ) -> Result<AuditEntryId, AuditError> {
        let entry = AuditEntry::from_new(entry, Utc::now());
        tx.insert_audit_entry(&entry)
            .await
            .map_err(|e| AuditError::write_failed(true, e))?;
        Ok(entry.id)
    }

    /// Write an entry in its own transaction.
    #[instrument(skip(self, entry), fields(table = %entry.table_name, action = entry.action.as_str()), err)]
    pub async fn record_change(&self, entry: NewAuditEntry) -> Result<AuditEntryId, AuditError> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| AuditError::StoreUnavailable(e.to_string()))?;
        let entry = AuditEntry::from_new(entry, Utc::now());
        if let Err(err) = tx.insert_audit_entry(&entry).await {
            abandon(tx).await;
            return Err(AuditError::write_failed(false, err));
        }
        tx.commit().await.map_err(|e| AuditError::write_failed(false, e))?;
        Ok(entry.id)
    }

    /// Record a view. Never fails the caller: problems are logged and `None`
    /// is returned.
    pub async fn record_read(&self, mut entry: NewAuditEntry) -> Option<AuditEntryId> {
        entry.action = AuditAction::Read;
        let table = entry.table_name.clone();
        match self.record_change(entry).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(table = %table, error = %err, "read audit dropped");
                None
            }
        }
    }

    /// Mark a row deleted and audit it, atomically.
    ///
    /// Returns `Ok(false)` when the row is missing, already deleted, or its
    /// update failed; nothing is written in those cases. Concurrent deletes of
    /// one row serialize on the row lock, so only the first one is audited. A
    /// failing dependents check counts as "no dependents".
    #[instrument(skip(self, by, reason, dependents), fields(user_id = %by.actor.id, record_id = %record_id), err)]
    pub async fn soft_delete(
        &self,
        table: &str,
        record_id: &RecordId,
        by: &AuthorizedActor,
        reason: Option<String>,
        dependents: &dyn DependentCheck,
    ) -> Result<bool, AuditError> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| AuditError::StoreUnavailable(e.to_string()))?;

        let row = match tx.load_row(table, record_id).await {
            Ok(Some(row)) if !is_soft_deleted(&row) => row,
            Ok(_) => {
                info!(table, "soft delete skipped: row missing or already deleted");
                abandon(tx).await;
                return Ok(false);
            }
            Err(err) => {
                abandon(tx).await;
                return Err(AuditError::StoreUnavailable(err.to_string()));
            }
        };

        let deps = dependents.dependents(table, record_id).await.unwrap_or_else(|err| {
            warn!(table, error = %err, "dependents check failed; assuming none");
            Dependents::none()
        });

        let marker = SoftDeleteMarker::new(by.actor.id, reason, Utc::now());
        match tx.write_soft_delete(table, record_id, Some(&marker)).await {
            Ok(true) => {}
            Ok(false) => {
                abandon(tx).await;
                return Ok(false);
            }
            Err(err) => {
                warn!(table, error = %err, "soft delete update failed");
                abandon(tx).await;
                return Ok(false);
            }
        }

        let label = record_label(Some(&row), None, Some(record_id));
        let mut summary = default_summary(AuditAction::Delete, table, label.as_deref(), &by.actor.display_name);
        if deps.has_blocking() {
            summary = format!("{summary} ({deps})");
        }
        let after = marker.apply_to(&row);
        let entry = NewAuditEntry::for_authorized(by, AuditAction::Delete, table)
            .record(record_id.clone())
            .before(row)
            .after(after)
            .summary(summary)
            .soft_delete();

        if let Err(err) = self.record_change_in(&mut tx, entry).await {
            abandon(tx).await;
            return Err(err);
        }
        commit_unless_raced(tx, table).await
    }

    /// Clear the marker and audit a `RESTORE`, atomically.
    ///
    /// Returns `Ok(false)` when the row is missing, not deleted, or its
    /// update failed.
    #[instrument(skip(self, by), fields(user_id = %by.actor.id, record_id = %record_id), err)]
    pub async fn restore(&self, table: &str, record_id: &RecordId, by: &AuthorizedActor) -> Result<bool, AuditError> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| AuditError::StoreUnavailable(e.to_string()))?;

        let deleted = match tx.load_row(table, record_id).await {
            Ok(Some(row)) if is_soft_deleted(&row) => row,
            Ok(_) => {
                abandon(tx).await;
                return Ok(false);
            }
            Err(err) => {
                abandon(tx).await;
                return Err(AuditError::StoreUnavailable(err.to_string()));
            }
        };

        match tx.write_soft_delete(table, record_id, None).await {
            Ok(true) => {}
            Ok(false) => {
                abandon(tx).await;
                return Ok(false);
            }
            Err(err) => {
                warn!(table, error = %err, "restore update failed");
                abandon(tx).await;
                return Ok(false);
            }
        }

        let restored = SoftDeleteMarker::clear(&deleted);
        let entry = NewAuditEntry::for_authorized(by, AuditAction::Restore, table)
            .record(record_id.clone())
            .before(deleted)
            .after(restored);

        if let Err(err) = self.record_change_in(&mut tx, entry).await {
            abandon(tx).await;
            return Err(err);
        }
        commit_unless_raced(tx, table).await
    }

    /// Audit trail of one record, oldest first.
    pub async fn history(&self, table: &str, record_id: &RecordId) -> Result<Vec<AuditEntry>, AuditError> {
        self.store
            .entries_for_record(table, record_id)
            .await
            .map_err(|e| AuditError::StoreUnavailable(e.to_string()))
    }
}

/// Commit a marker change. Losing a race to another writer of the same row
/// means nothing happened, not an error.
async fn commit_unless_raced<T: StoreTransaction>(tx: T, table: &str) -> Result<bool, AuditError> {
    match tx.commit().await {
        Ok(()) => Ok(true),
        Err(StoreError::Conflict(reason)) => {
            info!(table, %reason, "row changed concurrently; nothing recorded");
            Ok(false)
        }
        Err(err) => Err(AuditError::write_failed(true, err)),
    }
}

pub(crate) async fn abandon<T: StoreTransaction>(tx: T) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use edugate_auth::{Action, Actor, Role};
    use edugate_core::UserId;
    use serde_json::json;

    fn director() -> AuthorizedActor {
        AuthorizedActor {
            actor: Actor::new(UserId::new(), "Alice", Role::new("director")),
            resource: "teachers".into(),
            action: Action::Delete,
            ip_address: Some("10.0.0.1".into()),
            user_agent: None,
        }
    }

    fn seeded() -> (InMemoryStore, AuditRecorder<InMemoryStore>, RecordId) {
        let store = InMemoryStore::new();
        let id = RecordId::from(7_i64);
        store.insert_record("teachers", id.clone(), json!({"id": 7, "name": "Jane", "is_deleted": false}));
        (store.clone(), AuditRecorder::new(store), id)
    }

    struct BrokenCheck;

    #[async_trait::async_trait]
    impl DependentCheck for BrokenCheck {
        async fn dependents(&self, _table: &str, _id: &RecordId) -> anyhow::Result<Dependents> {
            anyhow::bail!("classes table offline")
        }
    }

    #[tokio::test]
    async fn missing_or_already_deleted_rows_are_not_deleted() {
        let (store, recorder, id) = seeded();
        let by = director();

        let missing = RecordId::from(99_i64);
        assert!(!recorder.soft_delete("teachers", &missing, &by, None, &NoDependents).await.unwrap());

        assert!(recorder.soft_delete("teachers", &id, &by, None, &NoDependents).await.unwrap());
        assert!(!recorder.soft_delete("teachers", &id, &by, None, &NoDependents).await.unwrap());
        assert_eq!(store.audit_entries().len(), 1);
    }

    struct SlowCheck;

    #[async_trait::async_trait]
    impl DependentCheck for SlowCheck {
        async fn dependents(&self, _table: &str, _id: &RecordId) -> anyhow::Result<Dependents> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Dependents::none())
        }
    }

    #[tokio::test]
    async fn concurrent_deletes_of_one_row_audit_once() {
        let (store, recorder, id) = seeded();
        let by = director();

        let (a, b) = tokio::join!(
            recorder.soft_delete("teachers", &id, &by, Some("first".into()), &SlowCheck),
            recorder.soft_delete("teachers", &id, &by, Some("second".into()), &SlowCheck),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one delete should win: a={a} b={b}");

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        let old = entries[0].old_data.as_ref().unwrap();
        assert_eq!(old["is_deleted"], json!(false));

        let winner = if a { "first" } else { "second" };
        let row = store.record("teachers", &id).unwrap();
        assert_eq!(row["delete_reason"], json!(winner));
        assert_eq!(entries[0].new_data.as_ref().unwrap()["delete_reason"], json!(winner));
    }

    #[tokio::test]
    async fn failed_row_update_returns_false_and_writes_nothing() {
        let (store, recorder, id) = seeded();
        store.fail_row_updates(true);

        let deleted = recorder.soft_delete("teachers", &id, &director(), None, &NoDependents).await.unwrap();
        assert!(!deleted);
        assert!(store.audit_entries().is_empty());
        assert_eq!(store.active_records("teachers").len(), 1);
    }

    #[tokio::test]
    async fn failing_dependents_check_counts_as_none() {
        let (store, recorder, id) = seeded();
        let deleted = recorder
            .soft_delete("teachers", &id, &director(), Some("left school".into()), &BrokenCheck)
            .await
            .unwrap();
        assert!(deleted);

        let entries = store.audit_entries();
        assert_eq!(entries[0].summary, "Teacher \"Jane\" deleted by Alice");
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.1"));
        let row = store.record("teachers", &id).unwrap();
        assert_eq!(row["delete_reason"], json!("left school"));
    }

    #[tokio::test]
    async fn audit_failure_rolls_back_the_soft_delete() {
        let (store, recorder, id) = seeded();
        store.fail_audit_writes(true);

        let err = recorder
            .soft_delete("teachers", &id, &director(), None, &NoDependents)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::AuditWriteFailed { transactional: true, .. }));
        assert!(!is_soft_deleted(&store.record("teachers", &id).unwrap()));
    }

    #[tokio::test]
    async fn restore_requires_a_deleted_row() {
        let (store, recorder, id) = seeded();
        assert!(!recorder.restore("teachers", &id, &director()).await.unwrap());
        assert!(store.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn standalone_write_failure_is_not_transactional() {
        let (store, recorder, id) = seeded();
        store.fail_audit_writes(true);
        let entry = NewAuditEntry::for_authorized(&director(), AuditAction::Update, "teachers").record(id);
        let err = recorder.record_change(entry).await.unwrap_err();
        assert!(matches!(err, AuditError::AuditWriteFailed { transactional: false, .. }));
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_on_soft_delete() {
        let (store, recorder, id) = seeded();
        store.set_unavailable(true);
        let err = recorder
            .soft_delete("teachers", &id, &director(), None, &NoDependents)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::StoreUnavailable(_)));
    }
}

//! `edugate-audit`: audit trail and soft-delete domain model.
//!
//! Pure types and functions only: entry construction, field-level diffs,
//! summaries and the soft-delete marker. Persistence and transactions are
//! handled by the recorder in `edugate-infra`.

pub mod diff;
pub mod entry;
pub mod soft_delete;
pub mod summary;

pub use diff::{FieldChange, diff_images};
pub use entry::{AuditAction, AuditEntry, NewAuditEntry};
pub use soft_delete::{BOOKKEEPING_FIELDS, Dependents, SoftDeleteMarker, is_soft_deleted, without_bookkeeping};
pub use summary::{default_summary, entity_label, record_label};

//! Reversible deletion marker carried on domain rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use edugate_core::UserId;

/// Columns owned by soft deletion; excluded when comparing a restored row
/// with its pre-delete image.
pub const BOOKKEEPING_FIELDS: [&str; 4] = ["is_deleted", "deleted_at", "deleted_by", "delete_reason"];

/// `is_deleted`, `deleted_at`, `deleted_by`, `delete_reason` on a domain row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteMarker {
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: UserId,
    pub delete_reason: Option<String>,
}

impl SoftDeleteMarker {
    pub fn new(deleted_by: UserId, reason: Option<String>, deleted_at: DateTime<Utc>) -> Self {
        Self {
            deleted_at,
            deleted_by,
            delete_reason: reason,
        }
    }

    /// Row image with the marker set.
    pub fn apply_to(&self, row: &JsonValue) -> JsonValue {
        let mut row = row.clone();
        if let JsonValue::Object(map) = &mut row {
            map.insert("is_deleted".into(), JsonValue::Bool(true));
            map.insert("deleted_at".into(), JsonValue::String(self.deleted_at.to_rfc3339()));
            map.insert("deleted_by".into(), JsonValue::String(self.deleted_by.to_string()));
            map.insert(
                "delete_reason".into(),
                self.delete_reason
                    .clone()
                    .map(JsonValue::String)
                    .unwrap_or(JsonValue::Null),
            );
        }
        row
    }

    /// Row image with the marker cleared.
    pub fn clear(row: &JsonValue) -> JsonValue {
        let mut row = row.clone();
        if let JsonValue::Object(map) = &mut row {
            map.insert("is_deleted".into(), JsonValue::Bool(false));
            for field in ["deleted_at", "deleted_by", "delete_reason"] {
                map.insert(field.into(), JsonValue::Null);
            }
        }
        row
    }
}

pub fn is_soft_deleted(row: &JsonValue) -> bool {
    matches!(row.get("is_deleted"), Some(JsonValue::Bool(true)))
}

/// Copy of a row image without soft-delete bookkeeping columns.
pub fn without_bookkeeping(row: &JsonValue) -> JsonValue {
    let mut row = row.clone();
    if let JsonValue::Object(map) = &mut row {
        for field in BOOKKEEPING_FIELDS {
            map.remove(field);
        }
    }
    row
}

/// Result of a domain-supplied dependents check, e.g. classes still
/// assigned to a teacher being deleted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependents {
    pub count: u64,
    /// Plural phrase completing the count: `"classes assigned"`.
    pub description: String,
}

impl Dependents {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(count: u64, description: impl Into<String>) -> Self {
        Self {
            count,
            description: description.into(),
        }
    }

    pub fn has_blocking(&self) -> bool {
        self.count > 0
    }
}

impl core::fmt::Display for Dependents {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.count, self.description)
    }
}

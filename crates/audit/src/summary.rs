//! One-line, human-readable change summaries.

use serde_json::Value as JsonValue;

use edugate_core::RecordId;

use crate::AuditAction;

/// Keys tried, in order, to find a display name inside a row image.
const NAME_KEYS: [&str; 6] = ["name", "full_name", "title", "label", "username", "email"];

/// Human entity label for a table name: `"training_sessions"` → `"Training session"`.
pub fn entity_label(table: &str) -> String {
    let singular = if let Some(stem) = table.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = table.strip_suffix("sses") {
        format!("{stem}ss")
    } else if let Some(stem) = table.strip_suffix("ses") {
        format!("{stem}s")
    } else if let Some(stem) = table.strip_suffix('s') {
        stem.to_string()
    } else {
        table.to_string()
    };

    let spaced = singular.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Record".to_string(),
    }
}

/// Best display name for a record: a name-like field of the newest image,
/// else the record id.
pub fn record_label(
    old: Option<&JsonValue>,
    new: Option<&JsonValue>,
    record_id: Option<&RecordId>,
) -> Option<String> {
    [new, old]
        .into_iter()
        .flatten()
        .find_map(|image| {
            NAME_KEYS.iter().find_map(|key| match image.get(*key) {
                Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
                _ => None,
            })
        })
        .or_else(|| record_id.map(|id| format!("#{id}")))
}

/// `Teacher "Jane Doe" updated by Alice`.
pub fn default_summary(action: AuditAction, table: &str, record: Option<&str>, actor: &str) -> String {
    let verb = match action {
        AuditAction::Create => "created",
        AuditAction::Update => "updated",
        AuditAction::Delete => "deleted",
        AuditAction::Read => "viewed",
        AuditAction::Restore => "restored",
    };
    let entity = entity_label(table);
    match record {
        Some(name) => format!("{entity} \"{name}\" {verb} by {actor}"),
        None => format!("{entity} records {verb} by {actor}"),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use edugate_auth::{Actor, AuthorizedActor, Role};
use edugate_core::{AuditEntryId, RecordId, UserId};

use crate::diff::{FieldChange, diff_images};
use crate::summary::{default_summary, record_label};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    Restore,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Read => "READ",
            AuditAction::Restore => "RESTORE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(AuditAction::Create),
            "UPDATE" => Some(AuditAction::Update),
            "DELETE" => Some(AuditAction::Delete),
            "READ" => Some(AuditAction::Read),
            "RESTORE" => Some(AuditAction::Restore),
            _ => None,
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change record as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub table_name: String,
    pub record_id: Option<RecordId>,
    pub old_data: Option<JsonValue>,
    pub new_data: Option<JsonValue>,
    /// Computed from the images when absent.
    pub summary: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_soft_delete: bool,
}

impl NewAuditEntry {
    pub fn new(actor: Actor, action: AuditAction, table_name: impl Into<String>) -> Self {
        Self {
            actor,
            action,
            table_name: table_name.into(),
            record_id: None,
            old_data: None,
            new_data: None,
            summary: None,
            ip_address: None,
            user_agent: None,
            is_soft_delete: false,
        }
    }

    /// Entry for the actor returned by the authorization façade, carrying the
    /// request origin along.
    pub fn for_authorized(
        authorized: &AuthorizedActor,
        action: AuditAction,
        table_name: impl Into<String>,
    ) -> Self {
        let mut entry = Self::new(authorized.actor.clone(), action, table_name);
        entry.ip_address = authorized.ip_address.clone();
        entry.user_agent = authorized.user_agent.clone();
        entry
    }

    pub fn record(mut self, id: RecordId) -> Self {
        self.record_id = Some(id);
        self
    }

    pub fn before(mut self, image: JsonValue) -> Self {
        self.old_data = Some(image);
        self
    }

    pub fn after(mut self, image: JsonValue) -> Self {
        self.new_data = Some(image);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn origin(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.is_soft_delete = true;
        self
    }
}

/// Immutable audit trail record. Written once, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,

    pub actor_id: UserId,
    pub actor_name: String,
    pub actor_role: Role,

    pub action: AuditAction,
    pub table_name: String,
    pub record_id: Option<RecordId>,

    pub old_data: Option<JsonValue>,
    pub new_data: Option<JsonValue>,
    pub changes: Vec<FieldChange>,
    pub summary: String,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_soft_delete: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Freeze a submitted entry: assign identity and timestamp, snapshot the
    /// actor, compute the diff and (if missing) the summary.
    pub fn from_new(new: NewAuditEntry, now: DateTime<Utc>) -> Self {
        let changes = diff_images(new.old_data.as_ref(), new.new_data.as_ref());
        let summary = match new.summary {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                let label = record_label(
                    new.old_data.as_ref(),
                    new.new_data.as_ref(),
                    new.record_id.as_ref(),
                );
                default_summary(new.action, &new.table_name, label.as_deref(), &new.actor.display_name)
            }
        };

        Self {
            id: AuditEntryId::new(),
            actor_id: new.actor.id,
            actor_name: new.actor.display_name,
            actor_role: new.actor.role,
            action: new.action,
            table_name: new.table_name,
            record_id: new.record_id,
            old_data: new.old_data,
            new_data: new.new_data,
            changes,
            summary,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            is_soft_delete: new.is_soft_delete,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edugate_auth::Action;
    use serde_json::json;

    fn alice() -> Actor {
        Actor::new(UserId::new(), "Alice", Role::new("director"))
    }

    #[test]
    fn computes_summary_and_diff() {
        let new = NewAuditEntry::new(alice(), AuditAction::Update, "teachers")
            .record(RecordId::from(7_i64))
            .before(json!({"name": "Jane", "phone": "1"}))
            .after(json!({"name": "Jane", "phone": "2"}));

        let entry = AuditEntry::from_new(new, Utc::now());
        assert_eq!(entry.summary, "Teacher \"Jane\" updated by Alice");
        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].field, "phone");
        assert_eq!(entry.actor_role.as_str(), "director");
    }

    #[test]
    fn keeps_caller_summary() {
        let new = NewAuditEntry::new(alice(), AuditAction::Read, "students").summary("listed 25 students");
        let entry = AuditEntry::from_new(new, Utc::now());
        assert_eq!(entry.summary, "listed 25 students");
        assert!(entry.changes.is_empty());
    }

    #[test]
    fn authorized_actor_carries_origin() {
        let authorized = AuthorizedActor {
            actor: alice(),
            resource: "schools".into(),
            action: Action::Update,
            ip_address: Some("10.1.2.3".into()),
            user_agent: Some("Mozilla/5.0".into()),
        };
        let new = NewAuditEntry::for_authorized(&authorized, AuditAction::Update, "schools");
        assert_eq!(new.ip_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(new.actor, authorized.actor);
    }

    #[test]
    fn action_serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&AuditAction::Restore).unwrap(), "\"RESTORE\"");
        assert_eq!(AuditAction::parse("DELETE"), Some(AuditAction::Delete));
        assert_eq!(AuditAction::parse("delete"), None);
    }
}

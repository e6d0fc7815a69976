//! Per-user menu overlay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use edugate_core::{ResourceId, UserId};

/// A user's presentation override for one resource.
///
/// Never shared across users and never a security control: it can hide,
/// pin, rename or reorder only what the resolver already allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMenuCustomization {
    pub user_id: UserId,
    pub resource_id: ResourceId,
    pub is_hidden: bool,
    pub is_pinned: bool,
    pub custom_label: Option<String>,
    pub custom_order: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// One change to a customization row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CustomizationPatch {
    Hide,
    Show,
    Pin,
    Unpin,
    /// `None` or a blank label restores the resource label.
    Rename { label: Option<String> },
    /// `None` restores the resource sort order.
    Reorder { order: Option<i32> },
}

impl UserMenuCustomization {
    /// Fresh, neutral overlay, created lazily on first customization.
    pub fn new(user_id: UserId, resource_id: ResourceId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            resource_id,
            is_hidden: false,
            is_pinned: false,
            custom_label: None,
            custom_order: None,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: &CustomizationPatch, now: DateTime<Utc>) {
        match patch {
            CustomizationPatch::Hide => self.is_hidden = true,
            CustomizationPatch::Show => self.is_hidden = false,
            CustomizationPatch::Pin => self.is_pinned = true,
            CustomizationPatch::Unpin => self.is_pinned = false,
            CustomizationPatch::Rename { label } => {
                self.custom_label = label
                    .as_deref()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string);
            }
            CustomizationPatch::Reorder { order } => self.custom_order = *order,
        }
        self.updated_at = now;
    }

    /// True when the overlay changes nothing.
    pub fn is_neutral(&self) -> bool {
        !self.is_hidden && !self.is_pinned && self.custom_label.is_none() && self.custom_order.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_update_in_place() {
        let now = Utc::now();
        let mut c = UserMenuCustomization::new(UserId::new(), ResourceId::new(3), now);
        assert!(c.is_neutral());

        c.apply(&CustomizationPatch::Hide, now);
        c.apply(&CustomizationPatch::Rename { label: Some("  My classes ".into()) }, now);
        c.apply(&CustomizationPatch::Reorder { order: Some(2) }, now);
        assert!(c.is_hidden);
        assert_eq!(c.custom_label.as_deref(), Some("My classes"));
        assert_eq!(c.custom_order, Some(2));

        c.apply(&CustomizationPatch::Show, now);
        c.apply(&CustomizationPatch::Rename { label: Some(" ".into()) }, now);
        c.apply(&CustomizationPatch::Reorder { order: None }, now);
        assert!(c.is_neutral());
    }
}

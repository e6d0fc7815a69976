//! Protected resources ("pages").

use serde::{Deserialize, Serialize};

use edugate_core::ResourceId;

/// How a resource participates in menu composition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuVisibility {
    #[default]
    Visible,
    Hidden,
    /// Shown only when every attached display condition passes.
    Conditional,
}

impl MenuVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuVisibility::Visible => "visible",
            MenuVisibility::Hidden => "hidden",
            MenuVisibility::Conditional => "conditional",
        }
    }

    /// Lenient parse for stored values; unknown values are treated as visible.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim() {
            "hidden" => MenuVisibility::Hidden,
            "conditional" => MenuVisibility::Conditional,
            _ => MenuVisibility::Visible,
        }
    }
}

/// A protected unit of functionality and navigation target.
///
/// Resources are structural: created by setup/migration, edited by
/// administrators, never soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Unique machine name used in grants (e.g. `"students"`).
    pub name: String,
    pub parent_id: Option<ResourceId>,
    pub level: i32,
    pub sort_order: Option<i32>,

    pub label: String,
    pub localized_label: Option<String>,
    pub icon: Option<String>,
    pub route: Option<String>,
    pub badge: Option<String>,
    pub css_class: Option<String>,

    pub is_displayed_in_menu: bool,
    pub menu_visibility: MenuVisibility,
    pub menu_group: Option<String>,
}

impl Resource {
    /// Minimal top-level resource, visible in the menu.
    pub fn new(id: ResourceId, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: None,
            level: 0,
            sort_order: None,
            label: label.into(),
            localized_label: None,
            icon: None,
            route: None,
            badge: None,
            css_class: None,
            is_displayed_in_menu: true,
            menu_visibility: MenuVisibility::Visible,
            menu_group: None,
        }
    }

    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent_id = Some(parent);
        self.level = 1;
        self
    }

    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = Some(order);
        self
    }

    pub fn with_visibility(mut self, visibility: MenuVisibility) -> Self {
        self.menu_visibility = visibility;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.menu_group = Some(group.into());
        self
    }

    pub fn hidden_from_menu(mut self) -> Self {
        self.is_displayed_in_menu = false;
        self
    }
}


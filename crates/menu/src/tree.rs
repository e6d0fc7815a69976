//! Menu filtering, hierarchy build and ordering.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use edugate_auth::{Action, MenuVisibility, PermissionMatrix, Resource};
use edugate_core::ResourceId;

use crate::condition::{ConditionContext, DisplayCondition, all_pass};
use crate::customization::UserMenuCustomization;

/// A resource joined with the requesting user's overlay row (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub resource: Resource,
    pub customization: Option<UserMenuCustomization>,
}

impl MenuEntry {
    fn effective_order(&self) -> Option<i32> {
        self.customization
            .as_ref()
            .and_then(|c| c.custom_order)
            .or(self.resource.sort_order)
    }

    /// Siblings sort by custom order, then sort order, then id. Entries
    /// without any order sort after ordered ones.
    fn order_key(&self) -> (bool, i32, ResourceId) {
        let order = self.effective_order();
        (order.is_none(), order.unwrap_or_default(), self.resource.id)
    }

    fn is_pinned(&self) -> bool {
        self.customization.as_ref().is_some_and(|c| c.is_pinned)
    }
}

/// Why a resource was left out of the menu.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    HiddenByUser,
    NotDisplayedInMenu,
    HiddenVisibility,
    ConditionFailed,
    NoViewAccess,
}

/// Visibility filter for one entry, first failing rule wins.
pub fn visibility(
    entry: &MenuEntry,
    conditions: &[DisplayCondition],
    ctx: &ConditionContext<'_>,
    matrix: &PermissionMatrix,
) -> Result<(), Exclusion> {
    if entry.customization.as_ref().is_some_and(|c| c.is_hidden) {
        return Err(Exclusion::HiddenByUser);
    }
    if !entry.resource.is_displayed_in_menu {
        return Err(Exclusion::NotDisplayedInMenu);
    }
    match entry.resource.menu_visibility {
        MenuVisibility::Hidden => return Err(Exclusion::HiddenVisibility),
        MenuVisibility::Conditional if !all_pass(conditions, ctx) => {
            return Err(Exclusion::ConditionFailed);
        }
        MenuVisibility::Conditional | MenuVisibility::Visible => {}
    }
    if !matrix.allows(&entry.resource.name, Action::View) {
        return Err(Exclusion::NoViewAccess);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuNode {
    pub id: ResourceId,
    pub name: String,
    /// Custom label when the user set one, else the resource label.
    pub label: String,
    pub localized_label: Option<String>,
    pub icon: Option<String>,
    pub route: Option<String>,
    pub badge: Option<String>,
    pub css_class: Option<String>,
    pub group: Option<String>,
    pub pinned: bool,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    fn leaf(entry: &MenuEntry) -> Self {
        let r = &entry.resource;
        Self {
            id: r.id,
            name: r.name.clone(),
            label: entry
                .customization
                .as_ref()
                .and_then(|c| c.custom_label.clone())
                .unwrap_or_else(|| r.label.clone()),
            localized_label: r.localized_label.clone(),
            icon: r.icon.clone(),
            route: r.route.clone(),
            badge: r.badge.clone(),
            css_class: r.css_class.clone(),
            group: r.menu_group.clone(),
            pinned: entry.is_pinned(),
            children: Vec::new(),
        }
    }

    /// This node followed by its descendants, depth-first.
    pub fn walk(&self) -> Vec<&MenuNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Roots sharing a `menu_group`, in first-appearance order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuGroup<'a> {
    pub name: Option<&'a str>,
    pub items: Vec<&'a MenuNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MenuTree {
    pub roots: Vec<MenuNode>,
    /// Pinned surviving resources, in sibling order, as flat shortcuts.
    pub pinned: Vec<ResourceId>,
}

impl MenuTree {
    pub fn nodes(&self) -> Vec<&MenuNode> {
        self.roots.iter().flat_map(MenuNode::walk).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes().iter().any(|n| n.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&MenuNode> {
        self.nodes().into_iter().find(|n| n.name == name)
    }

    /// Group roots by `menu_group` for top-level presentation.
    pub fn groups(&self) -> Vec<MenuGroup<'_>> {
        let mut groups: Vec<MenuGroup<'_>> = Vec::new();
        for root in &self.roots {
            let name = root.group.as_deref();
            match groups.iter_mut().find(|g| g.name == name) {
                Some(group) => group.items.push(root),
                None => groups.push(MenuGroup {
                    name,
                    items: vec![root],
                }),
            }
        }
        groups
    }
}

/// Compose the visible menu tree.
///
/// Every entry that passes [`visibility`] appears exactly once: children of
/// filtered or missing parents are promoted to roots, and parent cycles are
/// cut at their lowest-ordered member.
pub fn compose(
    entries: Vec<MenuEntry>,
    conditions: &HashMap<ResourceId, Vec<DisplayCondition>>,
    ctx: &ConditionContext<'_>,
    matrix: &PermissionMatrix,
) -> MenuTree {
    let mut survivors: BTreeMap<ResourceId, MenuEntry> = BTreeMap::new();
    for entry in entries {
        let conds = conditions
            .get(&entry.resource.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        match visibility(&entry, conds, ctx, matrix) {
            Ok(()) => {
                survivors.insert(entry.resource.id, entry);
            }
            Err(reason) => {
                tracing::trace!(resource = %entry.resource.name, ?reason, "menu entry excluded");
            }
        }
    }

    let parents = effective_parents(&survivors);

    let mut children: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
    let mut roots: Vec<ResourceId> = Vec::new();
    for id in survivors.keys() {
        match parents.get(id).copied().flatten() {
            Some(parent) => children.entry(parent).or_default().push(*id),
            None => roots.push(*id),
        }
    }

    let key = |id: &ResourceId| survivors[id].order_key();
    roots.sort_by_key(key);
    for siblings in children.values_mut() {
        siblings.sort_by_key(key);
    }

    let mut tree = MenuTree::default();
    for root in &roots {
        tree.roots.push(build_node(*root, &survivors, &children));
    }
    let pinned: Vec<ResourceId> = tree
        .nodes()
        .into_iter()
        .filter(|n| n.pinned)
        .map(|n| n.id)
        .collect();
    tree.pinned = pinned;
    tree
}

fn build_node(
    id: ResourceId,
    survivors: &BTreeMap<ResourceId, MenuEntry>,
    children: &HashMap<ResourceId, Vec<ResourceId>>,
) -> MenuNode {
    let mut node = MenuNode::leaf(&survivors[&id]);
    if let Some(kids) = children.get(&id) {
        node.children = kids
            .iter()
            .map(|kid| build_node(*kid, survivors, children))
            .collect();
    }
    node
}

/// Parent of every survivor after orphan promotion and cycle cutting.
/// `None` marks a root.
fn effective_parents(
    survivors: &BTreeMap<ResourceId, MenuEntry>,
) -> HashMap<ResourceId, Option<ResourceId>> {
    let mut parents: HashMap<ResourceId, Option<ResourceId>> = survivors
        .iter()
        .map(|(id, entry)| {
            let parent = entry
                .resource
                .parent_id
                .filter(|p| p != id && survivors.contains_key(p));
            (*id, parent)
        })
        .collect();

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        OnPath,
        Done,
    }
    let mut marks: HashMap<ResourceId, Mark> = HashMap::new();

    for start in survivors.keys() {
        let mut path: Vec<ResourceId> = Vec::new();
        let mut cursor = Some(*start);

        while let Some(id) = cursor {
            match marks.get(&id) {
                Some(Mark::Done) => break,
                Some(Mark::OnPath) => {
                    // `id` closes a cycle; cut it at the lowest-ordered member.
                    let pos = path.iter().position(|p| *p == id).unwrap_or_default();
                    if let Some(cut) = path[pos..]
                        .iter()
                        .min_by_key(|p| survivors[*p].order_key())
                        .copied()
                    {
                        tracing::warn!(resource_id = %cut, "menu parent cycle cut; promoting to root");
                        parents.insert(cut, None);
                    }
                    break;
                }
                None => {
                    marks.insert(id, Mark::OnPath);
                    path.push(id);
                    cursor = parents.get(&id).copied().flatten();
                }
            }
        }

        for id in path {
            marks.insert(id, Mark::Done);
        }
    }

    parents
}

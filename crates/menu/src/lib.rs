//! `edugate-menu`: per-user navigation tree composition.
//!
//! The menu decides what is *shown*, never what is *allowed*: every
//! navigation still goes through the authorization façade.

pub mod condition;
pub mod customization;
pub mod tree;

pub use condition::{ConditionContext, ConditionRow, DisplayCondition, RoleOperator};
pub use customization::{CustomizationPatch, UserMenuCustomization};
pub use tree::{Exclusion, MenuEntry, MenuGroup, MenuNode, MenuTree, compose, visibility};

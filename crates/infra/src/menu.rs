//! Menu services: per-request composition and per-user customization.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use edugate_auth::{AuthzError, Role};
use edugate_core::{ResourceId, UserId};
use edugate_menu::{
    ConditionContext, CustomizationPatch, DisplayCondition, MenuTree, UserMenuCustomization, compose,
};

use crate::resolver::PermissionResolver;
use crate::store::{MenuStore, PermissionStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MenuError {
    #[error("menu store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("customization rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

impl From<StoreError> for MenuError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteRejected(reason) => MenuError::Rejected(reason),
            other => MenuError::StoreUnavailable(other.to_string()),
        }
    }
}

pub struct MenuComposer<S> {
    resolver: PermissionResolver<S>,
}

impl<S> MenuComposer<S>
where
    S: PermissionStore + MenuStore,
{
    pub fn new(resolver: PermissionResolver<S>) -> Self {
        Self { resolver }
    }

    /// Build the navigation tree `user_id` sees when acting as `role`.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role), err)]
    pub async fn compose_menu(&self, user_id: UserId, role: &Role) -> Result<MenuTree, MenuError> {
        let store = self.resolver.store();
        let (entries, rows, matrix) = tokio::try_join!(
            async { store.menu_entries(user_id).await.map_err(MenuError::from) },
            async { store.display_conditions().await.map_err(MenuError::from) },
            async { self.resolver.effective_permissions(role).await.map_err(MenuError::from) },
        )?;

        let mut conditions: HashMap<ResourceId, Vec<DisplayCondition>> = HashMap::new();
        for row in &rows {
            conditions
                .entry(row.resource_id)
                .or_default()
                .push(DisplayCondition::from_row(row));
        }

        let ctx = ConditionContext {
            role,
            user_id,
            now: Utc::now(),
        };
        Ok(compose(entries, &conditions, &ctx, &matrix))
    }
}

/// Per-user overlay edits. Rows are created on first use and updated in
/// place afterwards.
pub struct MenuCustomizer<S> {
    store: S,
}

impl<S> MenuCustomizer<S>
where
    S: MenuStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(user_id = %user_id, resource_id = %resource_id), err)]
    pub async fn customize(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
        patch: CustomizationPatch,
    ) -> Result<UserMenuCustomization, MenuError> {
        let now = Utc::now();
        let mut row = self
            .store
            .customization(user_id, resource_id)
            .await?
            .unwrap_or_else(|| UserMenuCustomization::new(user_id, resource_id, now));
        row.apply(&patch, now);
        self.store.save_customization(&row).await?;
        Ok(row)
    }

    pub async fn hide(&self, user_id: UserId, resource_id: ResourceId, hidden: bool) -> Result<UserMenuCustomization, MenuError> {
        let patch = if hidden { CustomizationPatch::Hide } else { CustomizationPatch::Show };
        self.customize(user_id, resource_id, patch).await
    }

    pub async fn pin(&self, user_id: UserId, resource_id: ResourceId, pinned: bool) -> Result<UserMenuCustomization, MenuError> {
        let patch = if pinned { CustomizationPatch::Pin } else { CustomizationPatch::Unpin };
        self.customize(user_id, resource_id, patch).await
    }

    pub async fn rename(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
        label: Option<String>,
    ) -> Result<UserMenuCustomization, MenuError> {
        self.customize(user_id, resource_id, CustomizationPatch::Rename { label }).await
    }

    pub async fn reorder(
        &self,
        user_id: UserId,
        resource_id: ResourceId,
        order: Option<i32>,
    ) -> Result<UserMenuCustomization, MenuError> {
        self.customize(user_id, resource_id, CustomizationPatch::Reorder { order }).await
    }

    /// Drop the overlay row entirely. Returns whether one existed.
    pub async fn reset(&self, user_id: UserId, resource_id: ResourceId) -> Result<bool, MenuError> {
        Ok(self.store.delete_customization(user_id, resource_id).await?)
    }
}

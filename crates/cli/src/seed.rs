//! JSON fixtures for running against the in-memory store.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use edugate_auth::{ActionGrant, Resource, ResourceGrant};
use edugate_infra::store::InMemoryStore;
use edugate_menu::ConditionRow;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub resources: Vec<Resource>,
    pub resource_grants: Vec<ResourceGrant>,
    pub action_grants: Vec<ActionGrant>,
    pub conditions: Vec<ConditionRow>,
}

impl Seed {
    pub fn apply(self, store: &InMemoryStore) {
        for resource in self.resources {
            store.insert_resource(resource);
        }
        for g in self.resource_grants {
            store.grant_resource(g.role.as_str(), &g.resource, g.allowed);
        }
        for g in self.action_grants {
            store.grant_action(g.role.as_str(), &g.resource, g.action, g.allowed);
        }
        for row in self.conditions {
            store.add_condition(row);
        }
    }
}

pub fn load(store: &InMemoryStore, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let seed: Seed = serde_json::from_str(&raw).with_context(|| format!("invalid seed file {}", path.display()))?;
    tracing::info!(
        resources = seed.resources.len(),
        grants = seed.resource_grants.len() + seed.action_grants.len(),
        "loaded seed"
    );
    seed.apply(store);
    Ok(())
}

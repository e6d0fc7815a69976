use serde::{Deserialize, Serialize};

use edugate_core::UserId;

use crate::Role;

/// The identity acting on a request, captured once per request.
///
/// Audit entries copy these fields at write time, so the trail stays correct
/// after the user is renamed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
        }
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.display_name)
    }
}

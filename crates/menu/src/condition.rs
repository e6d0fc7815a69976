//! Display conditions attached to `conditional` resources.
//!
//! Stored rows are `(type, operator, value)`; they are decoded once into a
//! closed enum with one evaluation arm per type. Types without an
//! implementation (and unknown types) pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use edugate_auth::Role;
use edugate_core::{ResourceId, UserId};

/// Raw stored condition row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionRow {
    pub resource_id: ResourceId,
    pub condition_type: String,
    pub operator: String,
    pub value: JsonValue,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleOperator {
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayCondition {
    Role {
        operator: RoleOperator,
        roles: Vec<Role>,
    },
    /// Reserved extension point; passes.
    UserCount { value: JsonValue },
    /// Reserved extension point; passes.
    FeatureFlag { value: JsonValue },
    /// Reserved extension point; passes.
    TimeBased { value: JsonValue },
    /// A role condition that could not be decoded. Fails, so a restriction
    /// that was meant to hide an item never turns into "show to everyone".
    Malformed { reason: String },
    /// Unrecognised type; passes.
    Unknown { condition_type: String },
}

/// Facts a condition may look at.
#[derive(Debug, Clone)]
pub struct ConditionContext<'a> {
    pub role: &'a Role,
    pub user_id: UserId,
    pub now: DateTime<Utc>,
}

impl DisplayCondition {
    pub fn from_row(row: &ConditionRow) -> Self {
        match row.condition_type.trim() {
            "role" => Self::decode_role(&row.operator, &row.value),
            "user_count" => DisplayCondition::UserCount {
                value: row.value.clone(),
            },
            "feature_flag" => DisplayCondition::FeatureFlag {
                value: row.value.clone(),
            },
            "time_based" => DisplayCondition::TimeBased {
                value: row.value.clone(),
            },
            other => DisplayCondition::Unknown {
                condition_type: other.to_string(),
            },
        }
    }

    fn decode_role(operator: &str, value: &JsonValue) -> Self {
        let operator = match operator.trim() {
            "in" => RoleOperator::In,
            "not_in" => RoleOperator::NotIn,
            other => {
                return DisplayCondition::Malformed {
                    reason: format!("unsupported role operator '{other}'"),
                };
            }
        };

        // Accept a JSON array of names or a comma-separated string.
        let roles: Option<Vec<Role>> = match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(|s| Role::new(s.trim().to_string())))
                .collect(),
            JsonValue::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Role::new(s.to_string()))
                    .collect(),
            ),
            _ => None,
        };

        match roles {
            Some(roles) => DisplayCondition::Role { operator, roles },
            None => DisplayCondition::Malformed {
                reason: format!("role list must be an array or string, got {value}"),
            },
        }
    }

    pub fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            DisplayCondition::Role { operator, roles } => {
                let member = roles.iter().any(|r| r == ctx.role);
                match operator {
                    RoleOperator::In => member,
                    RoleOperator::NotIn => !member,
                }
            }
            DisplayCondition::UserCount { .. }
            | DisplayCondition::FeatureFlag { .. }
            | DisplayCondition::TimeBased { .. }
            | DisplayCondition::Unknown { .. } => true,
            DisplayCondition::Malformed { .. } => false,
        }
    }
}

/// AND over every condition attached to one resource.
pub fn all_pass(conditions: &[DisplayCondition], ctx: &ConditionContext<'_>) -> bool {
    conditions.iter().all(|c| c.evaluate(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(kind: &str, op: &str, value: JsonValue) -> ConditionRow {
        ConditionRow {
            resource_id: ResourceId::new(1),
            condition_type: kind.to_string(),
            operator: op.to_string(),
            value,
        }
    }

    fn ctx(role: &Role) -> ConditionContext<'_> {
        ConditionContext {
            role,
            user_id: UserId::new(),
            now: Utc::now(),
        }
    }

    #[test]
    fn role_in_and_not_in() {
        let cond = DisplayCondition::from_row(&row("role", "in", json!(["admin", "director"])));
        assert!(cond.evaluate(&ctx(&Role::admin())));
        assert!(!cond.evaluate(&ctx(&Role::new("teacher"))));

        let cond = DisplayCondition::from_row(&row("role", "not_in", json!("student, parent")));
        assert!(cond.evaluate(&ctx(&Role::new("teacher"))));
        assert!(!cond.evaluate(&ctx(&Role::new("parent"))));
    }

    #[test]
    fn reserved_and_unknown_types_pass() {
        let teacher = Role::new("teacher");
        for kind in ["user_count", "feature_flag", "time_based", "moon_phase"] {
            let cond = DisplayCondition::from_row(&row(kind, "eq", json!(1)));
            assert!(cond.evaluate(&ctx(&teacher)), "{kind} should pass");
        }
    }

    #[test]
    fn malformed_role_condition_fails() {
        let teacher = Role::new("teacher");
        let bad_op = DisplayCondition::from_row(&row("role", "matches", json!(["teacher"])));
        let bad_value = DisplayCondition::from_row(&row("role", "in", json!({"roles": 1})));
        assert!(matches!(bad_op, DisplayCondition::Malformed { .. }));
        assert!(!bad_op.evaluate(&ctx(&teacher)));
        assert!(!bad_value.evaluate(&ctx(&teacher)));
    }

    #[test]
    fn conditions_are_anded() {
        let director = Role::new("director");
        let conds = vec![
            DisplayCondition::from_row(&row("role", "in", json!(["admin", "director"]))),
            DisplayCondition::from_row(&row("role", "not_in", json!(["director"]))),
        ];
        assert!(!all_pass(&conds, &ctx(&director)));
        assert!(all_pass(&[], &ctx(&director)));
    }
}

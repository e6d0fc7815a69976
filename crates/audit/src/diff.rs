//! Field-level diff between two row images.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Name used for the change when an image is not a JSON object.
const WHOLE_IMAGE: &str = "$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<JsonValue>,
    pub new: Option<JsonValue>,
}

/// Compute the changed fields between a before- and after-image.
///
/// Object images are compared key by key (sorted by key); any other shape is
/// compared as a whole. Keys present on one side only show up with `None` on
/// the other.
pub fn diff_images(old: Option<&JsonValue>, new: Option<&JsonValue>) -> Vec<FieldChange> {
    match (old, new) {
        (None, None) => Vec::new(),
        (Some(JsonValue::Object(a)), Some(JsonValue::Object(b))) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            keys.into_iter()
                .filter_map(|key| {
                    let before = a.get(key);
                    let after = b.get(key);
                    (before != after).then(|| FieldChange {
                        field: key.clone(),
                        old: before.cloned(),
                        new: after.cloned(),
                    })
                })
                .collect()
        }
        (None, Some(JsonValue::Object(b))) => b
            .iter()
            .map(|(k, v)| FieldChange {
                field: k.clone(),
                old: None,
                new: Some(v.clone()),
            })
            .collect(),
        (Some(JsonValue::Object(a)), None) => a
            .iter()
            .map(|(k, v)| FieldChange {
                field: k.clone(),
                old: Some(v.clone()),
                new: None,
            })
            .collect(),
        (before, after) if before == after => Vec::new(),
        (before, after) => vec![FieldChange {
            field: WHOLE_IMAGE.to_string(),
            old: before.cloned(),
            new: after.cloned(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_only_changed_fields() {
        let old = json!({"name": "Jane", "phone": "123", "school_id": 4});
        let new = json!({"name": "Jane", "phone": "456", "school_id": 4});
        let changes = diff_images(Some(&old), Some(&new));
        assert_eq!(
            changes,
            vec![FieldChange {
                field: "phone".into(),
                old: Some(json!("123")),
                new: Some(json!("456")),
            }]
        );
    }

    #[test]
    fn added_and_removed_keys_appear_with_none() {
        let old = json!({"a": 1});
        let new = json!({"b": 2});
        let changes = diff_images(Some(&old), Some(&new));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "a");
        assert_eq!(changes[0].new, None);
        assert_eq!(changes[1].field, "b");
        assert_eq!(changes[1].old, None);
    }

    #[test]
    fn creation_lists_every_field() {
        let new = json!({"name": "Jane", "email": "jane@example.com"});
        let changes = diff_images(None, Some(&new));
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.old.is_none()));
    }

    #[test]
    fn scalar_images_compare_whole() {
        let changes = diff_images(Some(&json!(1)), Some(&json!(2)));
        assert_eq!(changes[0].field, "$");
        assert!(diff_images(Some(&json!("x")), Some(&json!("x"))).is_empty());
    }
}

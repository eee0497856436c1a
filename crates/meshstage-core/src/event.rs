//! # Tag-Change Events
//!
//! Normalises raw change notifications into a [`TagChangeEvent`].
//!
//! ## Accepted Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Notification Shapes                                 │
//! │                                                                         │
//! │  1. Resource tag change                                                │
//! │     {                                                                   │
//! │       "resources": ["arn:...:service/svc-0abc"],                       │
//! │       "detail": { "tags": { "Stage": "Beta", "team": "payments" } }    │
//! │     }                                                                   │
//! │     stage tag present → Assign, absent → Remove                        │
//! │                                                                         │
//! │  2. Network-instance API call                                          │
//! │     {                                                                   │
//! │       "detail": {                                                      │
//! │         "eventName": "CreateTags" | "DeleteTags",                      │
//! │         "requestParameters": {                                         │
//! │           "resourcesSet": { "items": [{ "resourceId": "vpc-0123" }] }, │
//! │           "tagSet": { "items": [{ "key": "stage", "value": "prod" }] } │
//! │         }                                                               │
//! │       }                                                                 │
//! │     }                                                                   │
//! │     DeleteTags → Remove                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{ResourceRef, StageName};
use crate::validation::validate_resource_id;
use crate::STAGE_LABEL;

/// What a notification asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "stage", rename_all = "snake_case")]
pub enum StageChange {
    /// The resource now carries this stage label.
    Assign(StageName),
    /// The stage label was removed.
    Remove,
}

/// A normalised, single-resource tag-change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagChangeEvent {
    pub resource: ResourceRef,
    pub change: StageChange,
    /// Full label set as delivered (keys unmodified).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TagChangeEvent {
    /// Builds an event from a resource and its full label set.
    pub fn from_labels(resource: ResourceRef, labels: BTreeMap<String, String>) -> CoreResult<Self> {
        let change = match stage_from_labels(&labels)? {
            Some(stage) => StageChange::Assign(stage),
            None => StageChange::Remove,
        };
        Ok(TagChangeEvent {
            resource,
            change,
            labels,
        })
    }

    /// Parses either supported notification shape.
    pub fn from_notification(raw: &Value) -> CoreResult<Self> {
        let detail = raw
            .get("detail")
            .ok_or_else(|| CoreError::notification("missing detail block"))?;

        if detail.get("requestParameters").is_some() {
            return Self::from_api_call(detail);
        }

        let resources = raw
            .get("resources")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::notification("missing resources list"))?;
        let arn = resources
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::notification("resources list is empty"))?;

        let resource = ResourceRef::from_arn(arn);
        validate_resource_id(&resource.id)?;

        let labels = match detail.get("tags") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), label_value(v)))
                .collect(),
            Some(_) => return Err(CoreError::notification("tags is not an object")),
        };

        Self::from_labels(resource, labels)
    }

    fn from_api_call(detail: &Value) -> CoreResult<Self> {
        let params = &detail["requestParameters"];

        let resource_id = params["resourcesSet"]["items"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item.get("resourceId"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::notification("resourcesSet has no resourceId"))?;
        validate_resource_id(resource_id)?;

        let labels: BTreeMap<String, String> = match params["tagSet"]["items"].as_array() {
            Some(items) => items
                .iter()
                .filter_map(|item| {
                    let key = item.get("key")?.as_str()?;
                    Some((key.to_string(), item.get("value").map(label_value).unwrap_or_default()))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        let resource = ResourceRef::from_id(resource_id);
        let event_name = detail.get("eventName").and_then(Value::as_str).unwrap_or("");

        if event_name == "DeleteTags" {
            return Ok(TagChangeEvent {
                resource,
                change: StageChange::Remove,
                labels,
            });
        }

        Self::from_labels(resource, labels)
    }

    /// The stage this event assigns, if any.
    pub fn stage(&self) -> Option<&StageName> {
        match &self.change {
            StageChange::Assign(stage) => Some(stage),
            StageChange::Remove => None,
        }
    }
}

fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extracts the stage from a label set.
///
/// The `stage` key is matched case-insensitively and its value is case-folded.
/// An empty value counts as no stage.
pub fn stage_from_labels(labels: &BTreeMap<String, String>) -> CoreResult<Option<StageName>> {
    let value = labels
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(STAGE_LABEL))
        .map(|(_, value)| value.trim());

    match value {
        None | Some("") => Ok(None),
        Some(raw) => Ok(Some(StageName::parse(raw)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_resource_tag_change_assign() {
        let raw = json!({
            "resources": ["arn:aws:vpc-lattice:eu-west-1:111122223333:service/svc-0abc"],
            "detail": { "tags": { "Stage": "Beta", "team": "payments" } }
        });
        let event = TagChangeEvent::from_notification(&raw).unwrap();
        assert_eq!(event.resource.id, "svc-0abc");
        assert_eq!(event.resource.kind, Some(ResourceKind::Service));
        assert_eq!(event.stage().map(StageName::as_str), Some("beta"));
        assert_eq!(event.labels.len(), 2);
    }

    #[test]
    fn test_missing_stage_is_removal() {
        let raw = json!({
            "resources": ["arn:aws:vpc-lattice:eu-west-1:111122223333:service/svc-0abc"],
            "detail": { "tags": { "team": "payments" } }
        });
        let event = TagChangeEvent::from_notification(&raw).unwrap();
        assert_eq!(event.change, StageChange::Remove);
    }

    #[test]
    fn test_api_call_shape() {
        let raw = json!({
            "detail": {
                "eventName": "CreateTags",
                "requestParameters": {
                    "resourcesSet": { "items": [{ "resourceId": "vpc-0123" }] },
                    "tagSet": { "items": [{ "key": "STAGE", "value": "prod" }] }
                }
            }
        });
        let event = TagChangeEvent::from_notification(&raw).unwrap();
        assert_eq!(event.resource.id, "vpc-0123");
        assert_eq!(event.resource.kind, Some(ResourceKind::VirtualNetwork));
        assert_eq!(event.stage().map(StageName::as_str), Some("prod"));
    }

    #[test]
    fn test_delete_tags_is_removal() {
        let raw = json!({
            "detail": {
                "eventName": "DeleteTags",
                "requestParameters": {
                    "resourcesSet": { "items": [{ "resourceId": "vpc-0123" }] },
                    "tagSet": { "items": [{ "key": "stage", "value": "prod" }] }
                }
            }
        });
        let event = TagChangeEvent::from_notification(&raw).unwrap();
        assert_eq!(event.change, StageChange::Remove);
    }

    #[test]
    fn test_malformed_notifications() {
        assert!(TagChangeEvent::from_notification(&json!({})).is_err());
        assert!(TagChangeEvent::from_notification(&json!({
            "resources": [], "detail": { "tags": {} }
        }))
        .is_err());
        assert!(TagChangeEvent::from_notification(&json!({
            "resources": ["arn:x:y:z:1:service/svc-1"], "detail": { "tags": [1] }
        }))
        .is_err());
    }

    #[test]
    fn test_empty_stage_value_counts_as_removal() {
        let mut labels = BTreeMap::new();
        labels.insert("stage".to_string(), "  ".to_string());
        assert_eq!(stage_from_labels(&labels).unwrap(), None);
    }
}

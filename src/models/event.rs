//! Raw cluster events consumed by the threshold engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The object a cluster event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedObject {
    /// Object kind (Pod, Node, Deployment...).
    pub kind: String,
    /// Object name.
    pub name: String,
}

/// A raw event as delivered by a cluster event stream.
///
/// Raw events exist only transiently inside the threshold engine; matching
/// rules fold bursts of them into synthesized alerts and the events
/// themselves are never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Epoch-millisecond timestamp of the event.
    pub timestamp: i64,

    /// Event reason (BackOff, FailedScheduling, OOMKilling...).
    pub reason: String,

    /// Event type (Warning, Normal...).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Free-form message.
    #[serde(default)]
    pub message: String,

    /// The object the event is about.
    #[serde(rename = "involvedObject", default)]
    pub involved_object: InvolvedObject,

    /// Namespace of the involved object.
    #[serde(default)]
    pub namespace: String,

    /// Free-form label bag.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl RawEvent {
    /// Resolves a rule field selector against this event.
    ///
    /// Supported selectors: `reason`, `type`, `message`, `namespace`,
    /// `involvedObject.kind`, `involvedObject.name`, and `labels.<key>`.
    /// Unknown selectors resolve to `None`.
    pub fn field(&self, selector: &str) -> Option<&str> {
        match selector {
            "reason" => Some(&self.reason),
            "type" => Some(&self.event_type),
            "message" => Some(&self.message),
            "namespace" => Some(&self.namespace),
            "involvedObject.kind" => Some(&self.involved_object.kind),
            "involvedObject.name" => Some(&self.involved_object.name),
            _ => selector
                .strip_prefix("labels.")
                .and_then(|key| self.labels.get(key).map(String::as_str)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> RawEvent {
        RawEvent {
            timestamp: 1_700_000_000_000,
            reason: "BackOff".to_string(),
            event_type: "Warning".to_string(),
            message: "Back-off restarting failed container".to_string(),
            involved_object: InvolvedObject { kind: "Pod".to_string(), name: "api-0".to_string() },
            namespace: "prod".to_string(),
            labels: HashMap::from([("app".to_string(), "api".to_string())]),
        }
    }

    #[test]
    fn field_resolves_top_level_and_nested_selectors() {
        let event = event();
        assert_eq!(event.field("reason"), Some("BackOff"));
        assert_eq!(event.field("type"), Some("Warning"));
        assert_eq!(event.field("involvedObject.kind"), Some("Pod"));
        assert_eq!(event.field("involvedObject.name"), Some("api-0"));
        assert_eq!(event.field("namespace"), Some("prod"));
        assert_eq!(event.field("labels.app"), Some("api"));
        assert_eq!(event.field("labels.missing"), None);
        assert_eq!(event.field("nope"), None);
    }

    #[test]
    fn event_type_uses_wire_name() {
        let json = r#"{
            "timestamp": 1,
            "reason": "BackOff",
            "type": "Warning",
            "involvedObject": {"kind": "Pod", "name": "api-0"}
        }"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, "Warning");
        assert_eq!(event.message, "");
    }
}

//! Declarative threshold rules that fold raw-event bursts into alerts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::alert::Severity;
use crate::models::event::RawEvent;

/// Field predicate of a threshold rule.
///
/// `fields` holds exact-equality checks on event field selectors (top-level
/// fields or `involvedObject.*`); `message_contains` adds an optional
/// substring check on the event message. An empty spec matches every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Field selector to required value, all of which must hold.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Substring that must occur in the event message.
    #[serde(default)]
    pub message_contains: Option<String>,
}

impl MatchSpec {
    /// True when every configured predicate holds for the event.
    pub fn matches(&self, event: &RawEvent) -> bool {
        let fields_match = self
            .fields
            .iter()
            .all(|(selector, expected)| event.field(selector) == Some(expected.as_str()));
        let message_matches = self
            .message_contains
            .as_ref()
            .map(|needle| event.message.contains(needle))
            .unwrap_or(true);
        fields_match && message_matches
    }
}

/// A declarative rule converting bursts of matching raw events into
/// synthesized alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Rule name; part of the synthesized alert's fingerprint.
    pub name: String,

    /// Ordered event-field selectors whose values form the grouping key.
    pub key: Vec<String>,

    /// Predicate an event must satisfy to count towards the rule.
    #[serde(rename = "match", default)]
    pub matchers: MatchSpec,

    /// Number of matching events within the window required to fire.
    pub threshold: usize,

    /// Severity of the synthesized alert.
    pub severity: Severity,

    /// Sliding-window span for counting matches, in milliseconds.
    pub window_ms: i64,

    /// Silent period after a firing, in milliseconds.
    pub cooldown_ms: i64,
}

impl ThresholdRule {
    /// True when the event satisfies the rule's predicate.
    pub fn matches(&self, event: &RawEvent) -> bool {
        self.matchers.matches(event)
    }

    /// The composite grouping key for an event: the rule's key selectors
    /// resolved in order and joined with `|`. Missing fields contribute an
    /// empty segment so the key stays positionally stable.
    pub fn composite_key(&self, event: &RawEvent) -> String {
        self.key
            .iter()
            .map(|selector| event.field(selector).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("|")
    }
}

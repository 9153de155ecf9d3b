use std::collections::HashMap;

use crate::models::{InvolvedObject, RawEvent};

/// Builds [`RawEvent`] fixtures: a `Warning` event at timestamp 1 with an
/// empty message and no involved object.
pub struct RawEventBuilder {
    event: RawEvent,
}

impl RawEventBuilder {
    /// Starts a builder for an event with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            event: RawEvent {
                timestamp: 1,
                reason: reason.into(),
                event_type: "Warning".to_string(),
                message: String::new(),
                involved_object: InvolvedObject::default(),
                namespace: String::new(),
                labels: HashMap::new(),
            },
        }
    }

    /// Sets the epoch-ms timestamp.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event.event_type = event_type.into();
        self
    }

    /// Sets the involved object.
    pub fn object(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.event.involved_object = InvolvedObject { kind: kind.into(), name: name.into() };
        self
    }

    /// Sets the namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.event.namespace = namespace.into();
        self
    }

    /// Sets the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the event.
    pub fn build(self) -> RawEvent {
        self.event
    }
}

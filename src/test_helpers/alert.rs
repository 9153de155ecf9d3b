use std::collections::HashMap;

use crate::models::{Alert, AlertStatus, Severity};

/// Builds [`Alert`] fixtures with sensible defaults: a firing, medium
/// severity metric alert from `datadog` at timestamp 1.
pub struct AlertBuilder {
    alert: Alert,
}

impl AlertBuilder {
    /// Starts a builder for an alert with the given fingerprint.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        Self {
            alert: Alert {
                timestamp: 1,
                source: "datadog".to_string(),
                id: None,
                title: fingerprint.clone(),
                fingerprint,
                status: AlertStatus::Firing,
                severity: Severity::Medium,
                kind: "metric".to_string(),
                entity_key: None,
                service: None,
                component: None,
                resource: None,
                namespace: None,
                pod: None,
                host: None,
                region: None,
                cluster: None,
                deploy_key: None,
                net_key: None,
                k8s_key: None,
                tags: HashMap::new(),
                count: 1,
                first_ts: None,
                last_ts: None,
            },
        }
    }

    /// Sets the epoch-ms timestamp.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.alert.timestamp = timestamp;
        self
    }

    /// Sets the source tag.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.alert.source = source.into();
        self
    }

    /// Sets the vendor event id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.alert.id = Some(id.into());
        self
    }

    /// Sets the status.
    pub fn status(mut self, status: AlertStatus) -> Self {
        self.alert.status = status;
        self
    }

    /// Sets the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.alert.severity = severity;
        self
    }

    /// Sets the explicit entity key.
    pub fn entity_key(mut self, entity_key: impl Into<String>) -> Self {
        self.alert.entity_key = Some(entity_key.into());
        self
    }

    /// Sets the service.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.alert.service = Some(service.into());
        self
    }

    /// Sets the component.
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.alert.component = Some(component.into());
        self
    }

    /// Sets the resource.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.alert.resource = Some(resource.into());
        self
    }

    /// Sets the deploy-correlation key.
    pub fn deploy_key(mut self, deploy_key: impl Into<String>) -> Self {
        self.alert.deploy_key = Some(deploy_key.into());
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.alert.tags.insert(key.into(), value.into());
        self
    }

    /// Builds the alert.
    pub fn build(self) -> Alert {
        self.alert
    }
}

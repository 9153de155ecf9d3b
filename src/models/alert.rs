//! The `Alert` model: the unit of telemetry flowing through the pipeline.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Fallback entity key used when an alert carries no scoping field at all.
pub const ENTITY_NA: &str = "na";

/// Lifecycle status carried by an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The underlying condition is active.
    Firing,
    /// The underlying condition has cleared.
    Resolved,
    /// Informational only; no active condition.
    Info,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
            AlertStatus::Info => write!(f, "info"),
        }
    }
}

/// Severity of an alert as reported by its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Lowest severity.
    Low,
    /// Elevated but not urgent.
    Medium,
    /// Urgent.
    High,
    /// Service-impacting.
    Critical,
}

impl Severity {
    /// Parses a severity token, mapping unknown tokens to `Low`.
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single alert emitted by a monitoring source.
///
/// Alerts are created at ingress and read-only thereafter; the pipeline
/// references them from at most one episode and drops them when that episode
/// is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Epoch-millisecond timestamp of the observation.
    pub timestamp: i64,

    /// Source tag (e.g. "k8s", "datadog", "logicmonitor").
    pub source: String,

    /// Vendor-assigned event id, if the source provides one.
    #[serde(default)]
    pub id: Option<String>,

    /// Stable identity of the alert's semantic condition, independent of the
    /// instance. Repeats of the same fingerprint collapse in the deduplicator.
    pub fingerprint: String,

    /// Human-readable title; the fingerprint is derived from it plus the tags.
    pub title: String,

    /// Lifecycle status.
    pub status: AlertStatus,

    /// Reported severity.
    pub severity: Severity,

    /// Free-form category of the alert (metric, event, probe, threshold...).
    pub kind: String,

    /// Explicit entity scope, overriding the service/component/resource
    /// fallback when present.
    #[serde(default)]
    pub entity_key: Option<String>,

    /// Logical service the alert is about.
    #[serde(default)]
    pub service: Option<String>,

    /// Component within the service.
    #[serde(default)]
    pub component: Option<String>,

    /// Concrete resource (queue, volume, table...).
    #[serde(default)]
    pub resource: Option<String>,

    /// Kubernetes namespace, when applicable.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Pod name, when applicable.
    #[serde(default)]
    pub pod: Option<String>,

    /// Host name, when applicable.
    #[serde(default)]
    pub host: Option<String>,

    /// Region, when applicable.
    #[serde(default)]
    pub region: Option<String>,

    /// Cluster, when applicable.
    #[serde(default)]
    pub cluster: Option<String>,

    /// Deploy-correlation key; presence near a situation's window start
    /// raises the change-proximity score.
    #[serde(default)]
    pub deploy_key: Option<String>,

    /// Network-correlation key.
    #[serde(default)]
    pub net_key: Option<String>,

    /// Kubernetes-correlation key.
    #[serde(default)]
    pub k8s_key: Option<String>,

    /// Free-form tag bag.
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Number of raw observations folded into this alert (synthesized
    /// threshold alerts carry the burst size; plain alerts carry 1).
    #[serde(default = "default_count")]
    pub count: u64,

    /// First observation timestamp for synthesized alerts.
    #[serde(default)]
    pub first_ts: Option<i64>,

    /// Last observation timestamp for synthesized alerts.
    #[serde(default)]
    pub last_ts: Option<i64>,
}

fn default_count() -> u64 {
    1
}

impl Alert {
    /// The smallest stable identifier of the thing this alert is about:
    /// the first non-empty of `entity_key`, `service`, `component`,
    /// `resource`, falling back to [`ENTITY_NA`].
    pub fn entity(&self) -> &str {
        [&self.entity_key, &self.service, &self.component, &self.resource]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|value| !value.is_empty())
            .unwrap_or(ENTITY_NA)
    }

    /// Key under which the deduplicator tracks this alert.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.fingerprint, self.entity())
    }

    /// Key under which the clusterer tracks this alert's episode.
    pub fn episode_key(&self) -> String {
        format!("{}|{}", self.entity(), self.fingerprint)
    }

    /// Derives a stable fingerprint from a title and tag bag. Tags are folded
    /// in key order so the result is independent of map iteration order.
    pub fn fingerprint_of(title: &str, tags: &HashMap<String, String>) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        title.hash(&mut hasher);
        let mut keys: Vec<&String> = tags.keys().collect();
        keys.sort();
        for key in keys {
            key.hash(&mut hasher);
            tags[key].hash(&mut hasher);
        }
        format!("fp-{:016x}", hasher.finish())
    }
}

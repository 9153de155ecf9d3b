//! The `Episode` model: a contiguous burst of alerts at one
//! `(entity, fingerprint)` key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::alert::{Alert, Severity};

/// Upper bound on alerts retained verbatim inside an episode. Alerts beyond
/// the cap still extend the episode's window and count.
pub const MAX_RETAINED_ALERTS: usize = 50;

/// Upper bound on sampled alert ids retained per episode.
pub const MAX_SAMPLED_IDS: usize = 50;

/// A contiguous burst of alerts sharing an entity and fingerprint, separated
/// from other bursts at the same key by a gap larger than the configured
/// episode gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Entity the burst is about.
    pub entity: String,

    /// Shared fingerprint of the member alerts.
    pub fingerprint: String,

    /// Distinct source tags observed in the burst.
    pub sources: BTreeSet<String>,

    /// Epoch-ms timestamp of the first member alert.
    pub start: i64,

    /// Epoch-ms timestamp of the latest member alert.
    pub end: i64,

    /// Total member alerts, including those beyond the retention cap.
    pub count: u64,

    /// Sampled vendor ids of member alerts, capped at [`MAX_SAMPLED_IDS`].
    pub alert_ids: Vec<String>,

    /// Member alerts retained verbatim, capped at [`MAX_RETAINED_ALERTS`].
    pub alerts: Vec<Alert>,

    /// Highest severity observed in the burst.
    pub severity: Severity,

    /// Whether the burst has been finalised by a gap break. Closed episodes
    /// accept no further mutation and are retained only until eviction.
    pub closed: bool,
}

impl Episode {
    /// Opens a new episode seeded with a single alert.
    pub fn open(alert: &Alert) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(alert.source.clone());
        let alert_ids = alert.id.iter().cloned().collect();
        Self {
            entity: alert.entity().to_string(),
            fingerprint: alert.fingerprint.clone(),
            sources,
            start: alert.timestamp,
            end: alert.timestamp,
            count: 1,
            alert_ids,
            alerts: vec![alert.clone()],
            severity: alert.severity,
            closed: false,
        }
    }

    /// The `(entity, fingerprint)` key this episode lives under.
    pub fn key(&self) -> String {
        format!("{}|{}", self.entity, self.fingerprint)
    }

    /// True when two episodes overlap in time.
    pub fn overlaps(&self, other: &Episode) -> bool {
        !(self.end < other.start || other.end < self.start)
    }
}

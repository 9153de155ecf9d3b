//! The `Situation` model: a group of time-overlapping episodes believed to
//! be part of the same incident, plus the published snapshot type.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::TickMetrics;
use crate::models::alert::Alert;
use crate::models::episode::Episode;

/// Upper bound on alerts sampled into a situation's related-alert list.
pub const MAX_RELATED_ALERTS: usize = 200;

/// Upper bound on suggested next actions per situation.
pub const MAX_NEXT_ACTIONS: usize = 5;

/// Time window spanned by a situation's member episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SituationWindow {
    /// Epoch-ms start: the earliest member episode start.
    pub start: i64,
    /// Epoch-ms end: the latest member episode end.
    pub end: i64,
}

/// Breadth of a situation measured in distinct entities and services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadius {
    /// Distinct entity keys across member episodes.
    pub entities: usize,
    /// Distinct service values across member episodes' retained alerts.
    pub services: usize,
}

/// The episode judged most likely to be the cause of a situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryCause {
    /// Entity key of the candidate cause episode.
    pub entity: String,
    /// Index of the cause within the situation's episode list.
    pub episode_idx: usize,
    /// Causal-plausibility confidence in `[0, 1]`.
    pub confidence: f64,
    /// Estimated effect lag behind the cause, in milliseconds.
    pub lag_ms: i64,
}

/// A group of time-overlapping episodes joined into one incident candidate.
///
/// Situations are rebuilt on every tick from the live episodes; a published
/// situation set is an immutable snapshot and is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    /// Deterministic id derived from the window bounds and group size.
    pub id: String,

    /// Window containing every member episode.
    pub window: SituationWindow,

    /// Member episodes, ordered ascending by start.
    pub episodes: Vec<Episode>,

    /// Alerts from the building tick whose timestamps fall inside the
    /// window, earliest first, capped at [`MAX_RELATED_ALERTS`].
    pub related_alerts: Vec<Alert>,

    /// Breadth of the incident.
    pub blast_radius: BlastRadius,

    /// Composite causal-plausibility score (non-negative).
    pub score: f64,

    /// Likely primary cause, attached by the scorer.
    pub primary_cause: Option<PrimaryCause>,

    /// Suggested next actions, capped at [`MAX_NEXT_ACTIONS`].
    pub next_actions: Vec<String>,
}

impl Situation {
    /// Deterministic situation id for a window and group size.
    pub fn id_for(start: i64, end: i64, group_size: usize) -> String {
        format!("sit-{start}-{end}-{group_size}")
    }
}

/// The complete output of one pipeline tick, published to subscribers and
/// retrievable synchronously. Snapshots are immutable once published.
#[derive(Debug, Clone, Default)]
pub struct SituationSnapshot {
    /// Monotonic tick index.
    pub tick: u64,
    /// Epoch-ms time the tick ran.
    pub generated_at: i64,
    /// Active situations, ordered by descending score.
    pub situations: Arc<Vec<Situation>>,
    /// Metrics for the tick that produced this snapshot.
    pub metrics: TickMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic_over_window_and_size() {
        assert_eq!(Situation::id_for(10, 20, 3), "sit-10-20-3");
        assert_eq!(Situation::id_for(10, 20, 3), Situation::id_for(10, 20, 3));
        assert_ne!(Situation::id_for(10, 20, 3), Situation::id_for(10, 20, 2));
    }
}

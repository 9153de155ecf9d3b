//! The situation scorer: lead-lag cross-correlation, graph proximity, and
//! the composite causal-plausibility score with suggested next actions.

use crate::config::PipelineConfig;
use crate::models::situation::MAX_NEXT_ACTIONS;
use crate::models::{Alert, Episode, GraphHints, PrimaryCause, Situation};

/// Width of a lead-lag histogram bin.
const BIN_MS: i64 = 1_000;

/// Depth bound for the graph-proximity search.
const MAX_GRAPH_DEPTH: usize = 4;

/// How close to the window start a deploy-keyed alert must be to count as a
/// change in proximity.
const CHANGE_PROXIMITY_MS: i64 = 600_000;

/// Composite weights.
const W_CHANGE: f64 = 0.35;
const W_LEAD_LAG: f64 = 0.20;
const W_PATH: f64 = 0.20;
const W_CARDINALITY: f64 = 0.15;
const W_SEVERITY: f64 = 0.15;
const W_FLAP: f64 = 0.10;

/// Per-excess-source echo penalty.
const ECHO_PENALTY_STEP: f64 = 0.05;

/// Attaches scores, primary causes, and next actions to situations.
#[derive(Debug, Default)]
pub struct SituationScorer;

impl SituationScorer {
    /// Creates a scorer.
    pub fn new() -> Self {
        Self
    }

    /// Scores one situation in place. The earliest episode is the candidate
    /// cause; the remainder are its presumed effects.
    pub fn score(&self, situation: &mut Situation, graph: &GraphHints, config: &PipelineConfig) {
        let Some(cause) = situation.episodes.first() else {
            return;
        };
        let effects = &situation.episodes[1..];

        let (similarity, lag_secs) = lead_lag(
            cause,
            effects,
            situation.window.end,
            (config.max_lead_ms / BIN_MS).max(0) as usize,
        );
        let path_score = path_score(cause, effects, graph);
        let cardinality = (1.0 + situation.blast_radius.entities as f64).ln();
        let severity = severity_score(&situation.episodes, config);
        let change = change_proximity(&situation.related_alerts, situation.window.start);
        let echo = echo_penalty(&situation.episodes);
        // Flap penalty is reserved; nothing populates it yet so the term
        // contributes nothing.
        let flap = 0.0;

        let composite = W_CHANGE * change
            + W_LEAD_LAG * similarity
            + W_PATH * path_score
            + W_CARDINALITY * cardinality
            + W_SEVERITY * severity
            - W_FLAP * flap
            - echo;
        situation.score = composite.max(0.0);

        situation.primary_cause = Some(PrimaryCause {
            entity: cause.entity.clone(),
            episode_idx: 0,
            confidence: situation.score.min(1.0),
            lag_ms: lag_secs as i64 * BIN_MS,
        });

        situation.next_actions = next_actions(situation, severity);
    }
}

/// Cross-correlates the cause's alert histogram against each effect's,
/// searching non-negative lags only. Returns the best cosine similarity and
/// the lag (in bins) that achieved it.
fn lead_lag(cause: &Episode, effects: &[Episode], window_end: i64, max_lag: usize) -> (f64, usize) {
    let origin = cause.start;
    let bins = ((window_end - origin) / BIN_MS).max(0) as usize + 1;
    let cause_hist = bin_alerts(&cause.alerts, origin, bins);
    if cause_hist.iter().all(|&count| count == 0.0) {
        return (0.0, 0);
    }
    let cause_norm: f64 = cause_hist.iter().map(|c| c * c).sum();

    let mut best = (0.0_f64, 0_usize);
    for effect in effects {
        let effect_hist = bin_alerts(&effect.alerts, origin, bins);
        let effect_norm: f64 = effect_hist.iter().map(|c| c * c).sum();
        if effect_norm == 0.0 {
            continue;
        }
        let denom = (cause_norm * effect_norm).sqrt();

        for lag in 0..=max_lag {
            let mut dot = 0.0;
            for (i, &a) in cause_hist.iter().enumerate() {
                if let Some(&b) = effect_hist.get(i + lag) {
                    dot += a * b;
                }
            }
            let similarity = dot / denom;
            if similarity > best.0 {
                best = (similarity, lag);
            }
        }
    }
    best
}

/// Bins alert timestamps into 1-second buckets from `origin`.
fn bin_alerts(alerts: &[Alert], origin: i64, bins: usize) -> Vec<f64> {
    let mut hist = vec![0.0; bins];
    for alert in alerts {
        let offset = alert.timestamp - origin;
        if offset < 0 {
            continue;
        }
        let bucket = (offset / BIN_MS) as usize;
        if bucket < bins {
            hist[bucket] += 1.0;
        }
    }
    hist
}

/// Graph proximity of the cause to its nearest effect: `1/(1+d*)` with the
/// shortest bounded undirected path, or 0 when no effect is reachable.
fn path_score(cause: &Episode, effects: &[Episode], graph: &GraphHints) -> f64 {
    let best = effects
        .iter()
        .filter_map(|effect| graph.distance(&cause.entity, &effect.entity, MAX_GRAPH_DEPTH))
        .min();
    match best {
        Some(distance) => 1.0 / (1.0 + distance as f64),
        None => 0.0,
    }
}

/// Highest member severity, normalised to `[0.25, 1.0]`.
fn severity_score(episodes: &[Episode], config: &PipelineConfig) -> f64 {
    episodes
        .iter()
        .map(|episode| config.severity_weights.weight(episode.severity))
        .max()
        .unwrap_or(1) as f64
        / 4.0
}

/// 1.0 when a deploy-keyed related alert lies within ten minutes of the
/// window start, else the 0.2 floor.
fn change_proximity(related_alerts: &[Alert], window_start: i64) -> f64 {
    let near_deploy = related_alerts.iter().any(|alert| {
        alert.deploy_key.is_some() && (alert.timestamp - window_start).abs() <= CHANGE_PROXIMITY_MS
    });
    if near_deploy {
        1.0
    } else {
        0.2
    }
}

/// Penalty for the same incident echoing through many sources.
fn echo_penalty(episodes: &[Episode]) -> f64 {
    let total_sources: usize = episodes.iter().map(|episode| episode.sources.len()).sum();
    let excess = total_sources.saturating_sub(episodes.len());
    excess as f64 * ECHO_PENALTY_STEP
}

/// Deterministic suggested-action rules, emitted in a fixed order and
/// capped at [`MAX_NEXT_ACTIONS`].
fn next_actions(situation: &Situation, severity: f64) -> Vec<String> {
    let mut actions: Vec<String> = Vec::new();
    let cause_entity = situation
        .episodes
        .first()
        .map(|episode| episode.entity.as_str())
        .unwrap_or_default();

    if situation.blast_radius.entities > 5 {
        actions.push("Page oncall team - multiple services affected".to_string());
    }
    if situation.blast_radius.services > 3 {
        actions.push("Check shared infrastructure components".to_string());
    }
    if cause_entity.contains("database") {
        actions.push("Check database connection pool and performance".to_string());
        actions.push("Verify database resource limits".to_string());
    }
    if cause_entity.contains("api") {
        actions.push("Check API rate limiting and quotas".to_string());
        actions.push("Verify upstream service health".to_string());
    }
    if cause_entity.contains("cache") {
        actions.push("Check cache hit rates and memory usage".to_string());
        actions.push("Verify cache cluster health".to_string());
    }
    if severity >= 0.75 {
        actions.push("Immediate escalation required".to_string());
    }

    actions.truncate(MAX_NEXT_ACTIONS);
    actions
}

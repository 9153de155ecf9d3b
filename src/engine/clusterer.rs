//! The episode clusterer: assigns surviving alerts to per-key episodes,
//! breaking on gaps and evicting episodes that age out of the window.

use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::models::episode::{MAX_RETAINED_ALERTS, MAX_SAMPLED_IDS};
use crate::models::{Alert, Episode};

/// Owns the episode store. Episodes are keyed by `entity|fingerprint`; at
/// most one episode per key is open at any moment, and closed episodes are
/// retained until they age out of the retention window.
#[derive(Debug, Default)]
pub struct EpisodeClusterer {
    open: HashMap<String, Episode>,
    closed: Vec<Episode>,
    entity_index: HashMap<String, Vec<String>>,
}

impl EpisodeClusterer {
    /// Creates an empty clusterer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns one tick's surviving alerts to episodes. Alerts are walked in
    /// timestamp order (ties by batch position) so burst boundaries inside
    /// the tick fall out of the same gap rule that applies across ticks.
    pub fn assign(&mut self, alerts: &[Alert], config: &PipelineConfig) {
        let mut ordered: Vec<&Alert> = alerts.iter().collect();
        ordered.sort_by_key(|alert| alert.timestamp);

        for alert in ordered {
            let key = alert.episode_key();
            match self.open.get_mut(&key) {
                None => {
                    self.insert_open(key, Episode::open(alert));
                }
                Some(episode) => {
                    let gap_broken = alert.timestamp - episode.end > config.episode_gap_ms;
                    let over_lifetime = alert.timestamp - episode.start
                        > config.max_situation_lifetime_ms;
                    if gap_broken || over_lifetime {
                        let mut finished = std::mem::replace(episode, Episode::open(alert));
                        finished.closed = true;
                        self.closed.push(finished);
                    } else {
                        extend(episode, alert, config);
                    }
                }
            }
        }
    }

    /// Removes every episode whose end has aged past `now - window_ms`.
    pub fn evict(&mut self, now_ms: i64, window_ms: i64) {
        let horizon = now_ms - window_ms;

        let mut evicted: Vec<(String, String)> = Vec::new();
        self.open.retain(|key, episode| {
            let live = episode.end >= horizon;
            if !live {
                evicted.push((episode.entity.clone(), key.clone()));
            }
            live
        });
        for (entity, key) in &evicted {
            if let Some(keys) = self.entity_index.get_mut(entity) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    self.entity_index.remove(entity);
                }
            }
        }

        self.closed.retain(|episode| episode.end >= horizon);
    }

    /// The episodes feeding situation construction: every episode whose end
    /// is still inside the window, sorted ascending by start.
    pub fn live_episodes(&self, now_ms: i64, window_ms: i64) -> Vec<Episode> {
        let horizon = now_ms - window_ms;
        let mut live: Vec<Episode> = self
            .open
            .values()
            .chain(self.closed.iter())
            .filter(|episode| episode.end >= horizon)
            .cloned()
            .collect();
        live.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key().cmp(&b.key())));
        live
    }

    /// Total episodes currently retained (open and closed).
    pub fn episode_count(&self) -> usize {
        self.open.len() + self.closed.len()
    }

    /// Distinct entities with at least one open episode.
    pub fn entity_count(&self) -> usize {
        self.entity_index.len()
    }

    /// Alerts retained verbatim across all episodes, for memory accounting.
    pub fn retained_alert_count(&self) -> usize {
        self.open
            .values()
            .chain(self.closed.iter())
            .map(|episode| episode.alerts.len())
            .sum()
    }

    fn insert_open(&mut self, key: String, episode: Episode) {
        let keys = self.entity_index.entry(episode.entity.clone()).or_default();
        if !keys.contains(&key) {
            keys.push(key.clone());
        }
        self.open.insert(key, episode);
    }
}

/// Extends an open episode with a subsequent alert inside the gap.
fn extend(episode: &mut Episode, alert: &Alert, config: &PipelineConfig) {
    episode.end = episode.end.max(alert.timestamp);
    episode.count += 1;
    episode.sources.insert(alert.source.clone());

    let weights = &config.severity_weights;
    if weights.weight(alert.severity) > weights.weight(episode.severity) {
        episode.severity = alert.severity;
    }

    if let Some(id) = &alert.id {
        if episode.alert_ids.len() < MAX_SAMPLED_IDS && !episode.alert_ids.contains(id) {
            episode.alert_ids.push(id.clone());
        }
    }
    if episode.alerts.len() < MAX_RETAINED_ALERTS {
        episode.alerts.push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertStatus, Severity};
    use crate::test_helpers::AlertBuilder;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn alert(ts: i64) -> Alert {
        AlertBuilder::new("fp-1").service("svc-a").timestamp(ts).build()
    }

    #[test]
    fn gap_break_closes_and_reopens() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;

        clusterer.assign(&[alert(t), alert(t + 60_000), alert(t + 300_000)], &cfg);

        let live = clusterer.live_episodes(t + 300_000, cfg.window_ms);
        assert_eq!(live.len(), 2);

        let first = &live[0];
        assert_eq!(first.start, t);
        assert_eq!(first.end, t + 60_000);
        assert_eq!(first.count, 2);
        assert!(first.closed);

        let second = &live[1];
        assert_eq!(second.start, t + 300_000);
        assert_eq!(second.end, t + 300_000);
        assert_eq!(second.count, 1);
        assert!(!second.closed);
    }

    #[test]
    fn one_open_episode_per_key() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;

        clusterer.assign(&[alert(t), alert(t + 300_000), alert(t + 600_000)], &cfg);

        let live = clusterer.live_episodes(t + 600_000, cfg.window_ms);
        let open: Vec<_> = live.iter().filter(|e| !e.closed).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].start, t + 600_000);
    }

    #[test]
    fn severity_upgrades_but_never_downgrades() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;
        let alerts = vec![
            AlertBuilder::new("fp-1").service("svc-a").timestamp(t).severity(Severity::Low).build(),
            AlertBuilder::new("fp-1")
                .service("svc-a")
                .timestamp(t + 1_000)
                .severity(Severity::Critical)
                .build(),
            AlertBuilder::new("fp-1")
                .service("svc-a")
                .timestamp(t + 2_000)
                .severity(Severity::Medium)
                .build(),
        ];

        clusterer.assign(&alerts, &cfg);

        let live = clusterer.live_episodes(t + 2_000, cfg.window_ms);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].severity, Severity::Critical);
    }

    #[test]
    fn source_mix_accumulates_distinct_tags() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;
        let alerts = vec![
            AlertBuilder::new("fp-1").service("svc-a").timestamp(t).source("k8s").build(),
            AlertBuilder::new("fp-1")
                .service("svc-a")
                .timestamp(t + 1_000)
                .source("datadog")
                .build(),
            AlertBuilder::new("fp-1").service("svc-a").timestamp(t + 2_000).source("k8s").build(),
        ];

        clusterer.assign(&alerts, &cfg);

        let live = clusterer.live_episodes(t + 2_000, cfg.window_ms);
        assert_eq!(live[0].sources.len(), 2);
        assert_eq!(live[0].count, 3);
    }

    #[test]
    fn retained_alerts_cap_at_fifty() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;
        let alerts: Vec<Alert> = (0..80)
            .map(|i| {
                AlertBuilder::new("fp-1")
                    .service("svc-a")
                    .timestamp(t + i * 100)
                    .id(format!("evt-{i}"))
                    .status(AlertStatus::Firing)
                    .build()
            })
            .collect();

        clusterer.assign(&alerts, &cfg);

        let live = clusterer.live_episodes(t + 10_000, cfg.window_ms);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].count, 80);
        assert_eq!(live[0].alerts.len(), MAX_RETAINED_ALERTS);
        assert_eq!(live[0].alert_ids.len(), MAX_SAMPLED_IDS);
    }

    #[test]
    fn eviction_drops_aged_episodes_and_index_entries() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;

        clusterer.assign(&[alert(t)], &cfg);
        assert_eq!(clusterer.episode_count(), 1);
        assert_eq!(clusterer.entity_count(), 1);

        clusterer.evict(t + cfg.window_ms + 1, cfg.window_ms);
        assert_eq!(clusterer.episode_count(), 0);
        assert_eq!(clusterer.entity_count(), 0);
        assert!(clusterer.live_episodes(t + cfg.window_ms + 1, cfg.window_ms).is_empty());
    }

    #[test]
    fn keys_cluster_independently() {
        let mut clusterer = EpisodeClusterer::new();
        let cfg = config();
        let t = 1_000_000;
        let alerts = vec![
            AlertBuilder::new("fp-1").service("svc-a").timestamp(t).build(),
            AlertBuilder::new("fp-2").service("svc-a").timestamp(t + 500).build(),
            AlertBuilder::new("fp-1").service("svc-b").timestamp(t + 1_000).build(),
        ];

        clusterer.assign(&alerts, &cfg);

        assert_eq!(clusterer.episode_count(), 3);
        assert_eq!(clusterer.entity_count(), 2);
    }

    #[test]
    fn lifetime_bound_forces_a_break() {
        let mut clusterer = EpisodeClusterer::new();
        let mut cfg = config();
        cfg.episode_gap_ms = 120_000;
        cfg.max_situation_lifetime_ms = 300_000;
        let t = 1_000_000;

        // Keep extending within the gap until the lifetime bound trips.
        let alerts: Vec<Alert> = (0..6).map(|i| alert(t + i * 100_000)).collect();
        clusterer.assign(&alerts, &cfg);

        let live = clusterer.live_episodes(t + 500_000, cfg.window_ms);
        assert!(live.len() > 1);
        for episode in &live {
            assert!(episode.end - episode.start <= cfg.max_situation_lifetime_ms);
        }
    }
}

//! The deduplicator: collapses repeats of the same alert key within a TTL,
//! tracks status-toggle flaps, and enforces a per-entity rate ceiling.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::PipelineConfig;
use crate::models::{Alert, AlertStatus};

/// Sliding-window span of the per-entity rate limit.
const RATE_WINDOW_MS: i64 = 60_000;

/// Dedup state for one `fingerprint|entity` key.
#[derive(Debug)]
struct DedupEntry {
    /// Timestamp anchoring the current TTL epoch (first alert of the epoch).
    last_seen: i64,
    /// Alerts observed in the current epoch.
    count: u64,
    /// Status toggles observed at this key. Not reset across epochs: a key
    /// that flaps stays suppressed until its state ages out.
    flap_count: u32,
    /// Last status observed.
    last_status: AlertStatus,
}

/// The surviving batch plus per-tick drop accounting.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Alerts that survived deduplication and rate limiting, in their
    /// original batch order.
    pub alerts: Vec<Alert>,
    /// Alerts dropped as plain duplicates.
    pub duplicates: u64,
    /// Alerts suppressed after crossing the flap threshold.
    pub flap_suppressed: u64,
    /// Alerts discarded by the per-entity rate ceiling.
    pub rate_limited: u64,
}

/// Collapses alert repeats and enforces the per-entity rate ceiling.
///
/// A repeat within the TTL whose status is unchanged is dropped as a
/// duplicate; a repeat whose status toggles passes through (the transition
/// carries signal) until the key has toggled `flap_drop_threshold` times,
/// after which its repeats are suppressed.
#[derive(Debug, Default)]
pub struct Deduplicator {
    entries: HashMap<String, DedupEntry>,
    rate_windows: HashMap<String, VecDeque<i64>>,
}

impl Deduplicator {
    /// Creates an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the per-alert dedup pass followed by the per-entity rate-limit
    /// pass over one tick's batch. `now_ms` is the tick time; the rate
    /// window slides against it, never against arrival wall clocks.
    pub fn process(
        &mut self,
        batch: Vec<Alert>,
        now_ms: i64,
        config: &PipelineConfig,
    ) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        let mut kept: Vec<Alert> = Vec::with_capacity(batch.len());

        for alert in batch {
            match self.entries.entry(alert.dedup_key()) {
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    if alert.timestamp - entry.last_seen < config.dedup_ttl_ms {
                        entry.count += 1;
                        if entry.last_status != alert.status {
                            entry.flap_count += 1;
                            entry.last_status = alert.status;
                            if entry.flap_count >= config.flap_drop_threshold {
                                outcome.flap_suppressed += 1;
                            } else {
                                kept.push(alert);
                            }
                        } else {
                            outcome.duplicates += 1;
                        }
                    } else {
                        entry.last_seen = alert.timestamp;
                        entry.count = 1;
                        entry.last_status = alert.status;
                        kept.push(alert);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(DedupEntry {
                        last_seen: alert.timestamp,
                        count: 1,
                        flap_count: 0,
                        last_status: alert.status,
                    });
                    kept.push(alert);
                }
            }
        }

        outcome.rate_limited = self.rate_limit(&mut kept, now_ms, config);
        outcome.alerts = kept;
        outcome
    }

    /// Applies the per-entity sliding-window rate limit, discarding the
    /// newest excess alerts while preserving original batch order for the
    /// survivors. Returns the number discarded.
    fn rate_limit(&mut self, kept: &mut Vec<Alert>, now_ms: i64, config: &PipelineConfig) -> u64 {
        let horizon = now_ms - RATE_WINDOW_MS;

        let mut by_entity: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, alert) in kept.iter().enumerate() {
            by_entity.entry(alert.entity()).or_default().push(idx);
        }

        let mut dropped: HashSet<usize> = HashSet::new();
        for (entity, mut indices) in by_entity {
            let window = self.rate_windows.entry(entity.to_string()).or_default();
            window.retain(|&ts| ts >= horizon);

            // The limit pass walks the entity's alerts oldest-first so the
            // newest excess is what gets discarded.
            indices.sort_by_key(|&idx| (kept[idx].timestamp, idx));
            for idx in indices {
                let ts = kept[idx].timestamp;
                if ts < horizon {
                    continue;
                }
                if window.len() < config.max_alerts_per_minute {
                    window.push_back(ts);
                } else {
                    dropped.insert(idx);
                }
            }
        }

        if dropped.is_empty() {
            return 0;
        }
        let discarded = dropped.len() as u64;
        let mut idx = 0;
        kept.retain(|_| {
            let keep = !dropped.contains(&idx);
            idx += 1;
            keep
        });
        discarded
    }

    /// Evicts dedup entries idle for longer than `max_age_ms` and prunes
    /// drained rate windows.
    pub fn gc(&mut self, now_ms: i64, max_age_ms: i64) {
        self.entries.retain(|_, entry| now_ms - entry.last_seen <= max_age_ms);
        let horizon = now_ms - RATE_WINDOW_MS;
        self.rate_windows.retain(|_, window| {
            window.retain(|&ts| ts >= horizon);
            !window.is_empty()
        });
    }

    /// Number of tracked dedup keys.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Alerts observed at a dedup key in its current TTL epoch, or 0 for an
    /// untracked key.
    pub fn observed_count(&self, key: &str) -> u64 {
        self.entries.get(key).map(|entry| entry.count).unwrap_or(0)
    }

    /// Status toggles observed at a dedup key, or 0 for an untracked key.
    pub fn flap_count(&self, key: &str) -> u32 {
        self.entries.get(key).map(|entry| entry.flap_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertStatus;
    use crate::test_helpers::AlertBuilder;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn alert(ts: i64, status: AlertStatus) -> Alert {
        AlertBuilder::new("fp-1").service("svc-a").timestamp(ts).status(status).build()
    }

    #[test]
    fn same_status_repeat_within_ttl_is_dropped() {
        let mut dedup = Deduplicator::new();
        let t = 1_000_000;
        let batch = vec![alert(t, AlertStatus::Firing), alert(t + 30_000, AlertStatus::Firing)];

        let outcome = dedup.process(batch, t + 30_000, &config());

        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.flap_suppressed, 0);
        assert_eq!(dedup.observed_count("fp-1|svc-a"), 2);
        assert_eq!(dedup.flap_count("fp-1|svc-a"), 0);
    }

    #[test]
    fn repeat_past_ttl_opens_a_new_epoch() {
        let mut dedup = Deduplicator::new();
        let t = 1_000_000;
        let cfg = config();

        let first = dedup.process(vec![alert(t, AlertStatus::Firing)], t, &cfg);
        assert_eq!(first.alerts.len(), 1);

        let second =
            dedup.process(vec![alert(t + 150_000, AlertStatus::Firing)], t + 150_000, &cfg);
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.duplicates, 0);
    }

    #[test]
    fn status_toggles_pass_until_flap_threshold() {
        let mut dedup = Deduplicator::new();
        let t = 1_000_000;
        let batch = vec![
            alert(t, AlertStatus::Firing),
            alert(t + 1_000, AlertStatus::Resolved),
            alert(t + 2_000, AlertStatus::Firing),
            alert(t + 3_000, AlertStatus::Resolved),
        ];

        let outcome = dedup.process(batch, t + 3_000, &config());

        // First three pass; the fourth toggle crosses the threshold of 3.
        assert_eq!(outcome.alerts.len(), 3);
        assert_eq!(outcome.flap_suppressed, 1);
        assert_eq!(outcome.alerts[0].status, AlertStatus::Firing);
        assert_eq!(outcome.alerts[1].status, AlertStatus::Resolved);
        assert_eq!(outcome.alerts[2].status, AlertStatus::Firing);
    }

    #[test]
    fn rate_ceiling_discards_newest_excess_per_entity() {
        let mut dedup = Deduplicator::new();
        let mut cfg = config();
        cfg.max_alerts_per_minute = 3;
        let now = 1_000_000;

        let batch: Vec<Alert> = (0..5)
            .map(|i| {
                AlertBuilder::new(format!("fp-{i}"))
                    .service("svc-a")
                    .timestamp(now - 10_000 + i * 1_000)
                    .build()
            })
            .collect();

        let outcome = dedup.process(batch, now, &cfg);

        assert_eq!(outcome.alerts.len(), 3);
        assert_eq!(outcome.rate_limited, 2);
        // Oldest three retained, original order preserved.
        let stamps: Vec<i64> = outcome.alerts.iter().map(|a| a.timestamp).collect();
        assert_eq!(stamps, vec![990_000, 991_000, 992_000]);
    }

    #[test]
    fn rate_window_slides_across_ticks() {
        let mut dedup = Deduplicator::new();
        let mut cfg = config();
        cfg.max_alerts_per_minute = 2;

        let first_now = 1_000_000;
        let first: Vec<Alert> = (0..2)
            .map(|i| {
                AlertBuilder::new(format!("a-{i}"))
                    .service("svc-a")
                    .timestamp(first_now - 1_000 + i)
                    .build()
            })
            .collect();
        assert_eq!(dedup.process(first, first_now, &cfg).alerts.len(), 2);

        // Next tick, window still covers the earlier two: a third is excess.
        let second_now = first_now + 5_000;
        let second = vec![AlertBuilder::new("a-2")
            .service("svc-a")
            .timestamp(second_now)
            .build()];
        let outcome = dedup.process(second, second_now, &cfg);
        assert!(outcome.alerts.is_empty());
        assert_eq!(outcome.rate_limited, 1);

        // Once the window slides past the old entries, capacity returns.
        let third_now = first_now + 70_000;
        let third = vec![AlertBuilder::new("a-3")
            .service("svc-a")
            .timestamp(third_now)
            .build()];
        assert_eq!(dedup.process(third, third_now, &cfg).alerts.len(), 1);
    }

    #[test]
    fn raising_the_ceiling_never_shrinks_the_retained_set() {
        let now = 1_000_000;
        let batch: Vec<Alert> = (0..10)
            .map(|i| {
                AlertBuilder::new(format!("fp-{i}"))
                    .service("svc-a")
                    .timestamp(now - 30_000 + i * 1_000)
                    .build()
            })
            .collect();

        let mut retained_low = {
            let mut cfg = config();
            cfg.max_alerts_per_minute = 4;
            Deduplicator::new().process(batch.clone(), now, &cfg).alerts
        };
        let mut retained_high = {
            let mut cfg = config();
            cfg.max_alerts_per_minute = 8;
            Deduplicator::new().process(batch, now, &cfg).alerts
        };

        retained_low.sort_by_key(|a| a.timestamp);
        retained_high.sort_by_key(|a| a.timestamp);
        assert!(retained_low.len() <= retained_high.len());
        for alert in &retained_low {
            assert!(retained_high.iter().any(|other| other.fingerprint == alert.fingerprint));
        }
    }

    #[test]
    fn gc_evicts_idle_entries() {
        let mut dedup = Deduplicator::new();
        let t = 1_000_000;
        let cfg = config();
        dedup.process(vec![alert(t, AlertStatus::Firing)], t, &cfg);
        assert_eq!(dedup.entry_count(), 1);

        dedup.gc(t + 300_000, cfg.dedup_max_age_ms);
        assert_eq!(dedup.entry_count(), 1);

        dedup.gc(t + 700_000, cfg.dedup_max_age_ms);
        assert_eq!(dedup.entry_count(), 0);
    }

    #[test]
    fn batch_order_is_preserved_for_survivors() {
        let mut dedup = Deduplicator::new();
        let now = 1_000_000;
        let batch = vec![
            AlertBuilder::new("b").service("svc-b").timestamp(now - 2_000).build(),
            AlertBuilder::new("a").service("svc-a").timestamp(now - 3_000).build(),
            AlertBuilder::new("c").service("svc-c").timestamp(now - 1_000).build(),
        ];

        let outcome = dedup.process(batch, now, &config());

        let order: Vec<&str> = outcome.alerts.iter().map(|a| a.fingerprint.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}

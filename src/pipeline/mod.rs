//! The tick-driven pipeline driver and its public handle.
//!
//! The driver is the single owner of all stage state. On every tick it
//! drains the bounded ingress queues into a batch, runs the batch through
//! the four stages in leaf order (threshold engine, deduplicator, episode
//! clusterer, situation builder + scorer), verifies the pipeline invariants,
//! and publishes a complete snapshot. Configuration and graph hints are
//! snapshotted once per tick, so updates land exactly at tick boundaries.

mod correlator;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use correlator::{Correlator, CorrelatorBuilder, CorrelatorError};

use crate::config::PipelineConfig;
use crate::context::{PipelineCounters, TickMetrics};
use crate::engine::{
    Deduplicator, EpisodeClusterer, SituationBuilder, SituationScorer, ThresholdEngine,
};
use crate::models::episode::MAX_RETAINED_ALERTS;
use crate::models::situation::{MAX_NEXT_ACTIONS, MAX_RELATED_ALERTS};
use crate::models::{
    Alert, Episode, GraphHints, RawEvent, Situation, SituationSnapshot, ThresholdRule,
};

/// A situation consumer registered through `Correlator::subscribe`, invoked
/// at most once per tick with the published set and the tick's metrics.
pub type Subscriber = Arc<dyn Fn(&[Situation], &TickMetrics) + Send + Sync>;

/// Errors that abort a single tick. No tick error is fatal: the driver logs
/// it, keeps the previous snapshot, and continues with the next tick.
#[derive(Debug, Error)]
pub enum TickError {
    /// A post-tick invariant check failed; the tick's output is discarded.
    #[error("pipeline invariant violated: {0}")]
    InvariantViolation(String),
}

/// Reads a std lock, recovering the guard if a writer panicked.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes a std lock, recovering the guard if a writer panicked.
pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the handle and the driver. The driver only reads
/// config and graph at tick boundaries; the handle mutates them at will.
pub(crate) struct SharedState {
    pub(crate) config: RwLock<PipelineConfig>,
    pub(crate) graph: RwLock<Arc<GraphHints>>,
    pub(crate) counters: PipelineCounters,
    pub(crate) subscribers: RwLock<Vec<Subscriber>>,
}

impl SharedState {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        Self {
            config: RwLock::new(config),
            graph: RwLock::new(Arc::new(GraphHints::default())),
            counters: PipelineCounters::default(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn config_snapshot(&self) -> PipelineConfig {
        read_lock(&self.config).clone()
    }

    pub(crate) fn graph_snapshot(&self) -> Arc<GraphHints> {
        Arc::clone(&read_lock(&self.graph))
    }
}

/// Identity of a situation's episode group: the sorted member
/// `(entity, fingerprint, start)` keys. Situation ids (`start-end-size`)
/// are deliberately non-unique, so the published set is keyed by group
/// identity instead — two disjoint groups born in the same tick with the
/// same window and size must both survive.
type GroupKey = Vec<(String, String, i64)>;

/// The group identity of a situation.
fn group_key(situation: &Situation) -> GroupKey {
    let mut key: GroupKey = situation
        .episodes
        .iter()
        .map(|episode| (episode.entity.clone(), episode.fingerprint.clone(), episode.start))
        .collect();
    key.sort();
    key
}

/// A situation retained in the published set, with the tick time it was
/// last regenerated.
struct PublishedEntry {
    situation: Situation,
    last_generated: i64,
}

/// The single-owner tick driver.
pub(crate) struct PipelineDriver {
    shared: Arc<SharedState>,
    alerts_rx: mpsc::Receiver<Alert>,
    events_rx: mpsc::Receiver<RawEvent>,
    snapshot_tx: watch::Sender<SituationSnapshot>,
    cancel: CancellationToken,
    threshold: ThresholdEngine,
    dedup: Deduplicator,
    clusterer: EpisodeClusterer,
    builder: SituationBuilder,
    scorer: SituationScorer,
    published: HashMap<GroupKey, PublishedEntry>,
    tick: u64,
}

impl PipelineDriver {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        rules: Vec<ThresholdRule>,
        alerts_rx: mpsc::Receiver<Alert>,
        events_rx: mpsc::Receiver<RawEvent>,
        snapshot_tx: watch::Sender<SituationSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            alerts_rx,
            events_rx,
            snapshot_tx,
            cancel,
            threshold: ThresholdEngine::new(rules),
            dedup: Deduplicator::new(),
            clusterer: EpisodeClusterer::new(),
            builder: SituationBuilder::new(),
            scorer: SituationScorer::new(),
            published: HashMap::new(),
            tick: 0,
        }
    }

    /// The driver's long-running loop. The only suspension points are the
    /// tick timer and the cancellation signal; a tick in progress always
    /// runs to completion.
    pub(crate) async fn run(mut self) {
        let mut hop = self.shared.config_snapshot().hop;
        let mut ticker = tokio::time::interval(hop);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(hop_ms = hop.as_millis() as u64, "pipeline driver started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("pipeline driver cancellation signal received, shutting down...");
                    break;
                }

                _ = ticker.tick() => {
                    let config = self.shared.config_snapshot();
                    if config.hop != hop {
                        hop = config.hop;
                        ticker = tokio::time::interval(hop);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        tracing::info!(hop_ms = hop.as_millis() as u64, "tick cadence updated");
                    }
                    self.run_tick(&config);
                }
            }
        }

        tracing::info!("pipeline driver has shut down.");
    }

    /// Runs one tick: drain, process, publish, account for overruns.
    fn run_tick(&mut self, config: &PipelineConfig) {
        let started = Instant::now();
        let now_ms = Utc::now().timestamp_millis();
        let events = drain(&mut self.events_rx);
        let alerts = drain(&mut self.alerts_rx);
        self.tick += 1;

        match self.process(config, now_ms, alerts, events) {
            Ok((situations, mut metrics)) => {
                metrics.processing_time_ms = started.elapsed().as_millis() as u64;
                let snapshot = SituationSnapshot {
                    tick: self.tick,
                    generated_at: now_ms,
                    situations: Arc::new(situations),
                    metrics,
                };
                let subscribers: Vec<Subscriber> =
                    read_lock(&self.shared.subscribers).clone();
                self.snapshot_tx.send_replace(snapshot.clone());
                for subscriber in &subscribers {
                    (subscriber.as_ref())(&snapshot.situations, &snapshot.metrics);
                }
            }
            Err(error) => {
                self.shared.counters.record_failed_tick();
                tracing::error!(
                    error = %error,
                    tick = self.tick,
                    "tick aborted; previous situation set retained"
                );
            }
        }

        let elapsed = started.elapsed();
        if elapsed > config.hop.saturating_mul(10) {
            self.shared.counters.record_overrun();
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                tick = self.tick,
                "tick overran its processing budget"
            );
        }
    }

    /// Runs the batch through the stages and maintains the published set.
    fn process(
        &mut self,
        config: &PipelineConfig,
        now_ms: i64,
        alerts: Vec<Alert>,
        events: Vec<RawEvent>,
    ) -> Result<(Vec<Situation>, TickMetrics), TickError> {
        let graph = self.shared.graph_snapshot();

        let mut batch = alerts;
        let synthesized = self.threshold.process(&events, now_ms);
        if !synthesized.is_empty() {
            tracing::debug!(count = synthesized.len(), "threshold engine synthesized alerts");
        }
        batch.extend(synthesized);
        self.threshold.gc(now_ms);
        let batch_len = batch.len();

        let outcome = self.dedup.process(batch, now_ms, config);
        self.shared.counters.record_duplicates(outcome.duplicates);
        self.shared.counters.record_flap_suppressed(outcome.flap_suppressed);
        self.shared.counters.record_rate_limited(outcome.rate_limited);
        self.dedup.gc(now_ms, config.dedup_max_age_ms);

        self.clusterer.assign(&outcome.alerts, config);
        self.clusterer.evict(now_ms, config.window_ms);
        let live = self.clusterer.live_episodes(now_ms, config.window_ms);

        let mut fresh = self.builder.build(live.clone(), &outcome.alerts);
        for situation in &mut fresh {
            self.scorer.score(situation, &graph, config);
        }

        check_invariants(&live, &fresh, now_ms, config)?;

        // The merged set is committed only once the published output passes
        // the coverage check, so an aborted tick leaves the store untouched.
        let merged = self.merge_published(&fresh, now_ms, config);
        let situations = ordered_situations(&merged);
        check_published_coverage(&live, &situations)?;
        self.published = merged;

        let dropped = outcome.duplicates + outcome.flap_suppressed + outcome.rate_limited;
        let confidence_sum: f64 = situations
            .iter()
            .filter_map(|s| s.primary_cause.as_ref())
            .map(|cause| cause.confidence)
            .sum();
        let metrics = TickMetrics {
            tick: self.tick,
            processing_time_ms: 0,
            memory_hint_mb: self.memory_hint_mb(),
            throughput_alerts_per_sec: batch_len as f64 / config.hop.as_secs_f64(),
            dedup_rate_pct: if batch_len == 0 {
                0.0
            } else {
                dropped as f64 / batch_len as f64 * 100.0
            },
            correlation_accuracy_pct: if situations.is_empty() {
                0.0
            } else {
                confidence_sum / situations.len() as f64 * 100.0
            },
            situation_count: situations.len(),
            episode_count: live.len(),
        };

        Ok((situations, metrics))
    }

    /// Folds the tick's fresh situations into a new published set. A fresh
    /// situation supersedes any published entry sharing a member episode;
    /// the remainder age out by window end or by the quiet threshold. The
    /// caller commits the result after validating it.
    fn merge_published(
        &self,
        fresh: &[Situation],
        now_ms: i64,
        config: &PipelineConfig,
    ) -> HashMap<GroupKey, PublishedEntry> {
        let fresh_members: HashSet<(&str, &str, i64)> = fresh
            .iter()
            .flat_map(|situation| situation.episodes.iter())
            .map(|episode| (episode.entity.as_str(), episode.fingerprint.as_str(), episode.start))
            .collect();
        let lifetime_horizon = now_ms - config.max_situation_lifetime_ms;
        let quiet_horizon = now_ms - config.quiet_threshold_ms;

        let mut merged: HashMap<GroupKey, PublishedEntry> = self
            .published
            .iter()
            .filter(|(_, entry)| {
                let superseded = entry.situation.episodes.iter().any(|episode| {
                    fresh_members.contains(&(
                        episode.entity.as_str(),
                        episode.fingerprint.as_str(),
                        episode.start,
                    ))
                });
                !superseded
                    && entry.situation.window.end >= lifetime_horizon
                    && entry.last_generated >= quiet_horizon
            })
            .map(|(key, entry)| {
                (
                    key.clone(),
                    PublishedEntry {
                        situation: entry.situation.clone(),
                        last_generated: entry.last_generated,
                    },
                )
            })
            .collect();

        for situation in fresh {
            merged.insert(
                group_key(situation),
                PublishedEntry { situation: situation.clone(), last_generated: now_ms },
            );
        }
        merged
    }

    /// Rough size of the retained pipeline state, in megabytes.
    fn memory_hint_mb(&self) -> f64 {
        let episode_bytes =
            self.clusterer.retained_alert_count() * 600 + self.clusterer.episode_count() * 400;
        let situation_bytes: usize = self
            .published
            .values()
            .map(|entry| entry.situation.related_alerts.len() * 600 + 1_000)
            .sum();
        (episode_bytes + situation_bytes) as f64 / 1_048_576.0
    }
}

/// Orders a published set by descending score. Ties fall back to the id
/// and then the first member's key, so situations sharing an id still sort
/// deterministically.
fn ordered_situations(published: &HashMap<GroupKey, PublishedEntry>) -> Vec<Situation> {
    let mut situations: Vec<Situation> =
        published.values().map(|entry| entry.situation.clone()).collect();
    situations.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| {
                let a_first = a.episodes.first().map(|episode| episode.key()).unwrap_or_default();
                let b_first = b.episodes.first().map(|episode| episode.key()).unwrap_or_default();
                a_first.cmp(&b_first)
            })
    });
    situations
}

/// Drains everything currently queued without awaiting. The queues are
/// bounded, so one drain is bounded too.
fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Verifies the pipeline's quantified invariants for one tick's output.
/// A violation aborts the tick rather than publishing a corrupt snapshot.
fn check_invariants(
    live: &[Episode],
    fresh: &[Situation],
    now_ms: i64,
    config: &PipelineConfig,
) -> Result<(), TickError> {
    let violation = |message: String| Err(TickError::InvariantViolation(message));

    let mut open_keys: HashSet<String> = HashSet::new();
    for episode in live {
        if episode.count == 0 {
            return violation(format!("episode {} has zero count", episode.key()));
        }
        if episode.start > episode.end {
            return violation(format!("episode {} starts after it ends", episode.key()));
        }
        if episode.alerts.len() > MAX_RETAINED_ALERTS {
            return violation(format!("episode {} exceeds the retained-alert cap", episode.key()));
        }
        if episode.end < now_ms - config.window_ms {
            return violation(format!("episode {} escaped window eviction", episode.key()));
        }
        if !episode.closed && !open_keys.insert(episode.key()) {
            return violation(format!("two open episodes at key {}", episode.key()));
        }
        for pair in episode.alerts.windows(2) {
            if pair[1].timestamp - pair[0].timestamp > config.episode_gap_ms {
                return violation(format!("episode {} violates the gap rule", episode.key()));
            }
        }
    }

    for situation in fresh {
        if situation.related_alerts.len() > MAX_RELATED_ALERTS {
            return violation(format!("situation {} exceeds the related-alert cap", situation.id));
        }
        if situation.next_actions.len() > MAX_NEXT_ACTIONS {
            return violation(format!("situation {} exceeds the next-action cap", situation.id));
        }
        if situation.score < 0.0 {
            return violation(format!("situation {} has a negative score", situation.id));
        }
        if let Some(cause) = &situation.primary_cause {
            if !(0.0..=1.0).contains(&cause.confidence) {
                return violation(format!("situation {} confidence out of bounds", situation.id));
            }
        }
        for episode in &situation.episodes {
            if episode.start < situation.window.start || episode.end > situation.window.end {
                return violation(format!(
                    "situation {} window does not contain episode {}",
                    situation.id,
                    episode.key()
                ));
            }
        }
    }

    Ok(())
}

/// Verifies situation coverage on the set that is actually published:
/// every live episode must appear in exactly one published situation.
/// Running this against the published output (not the tick's fresh set)
/// catches any divergence introduced while maintaining the published set.
fn check_published_coverage(live: &[Episode], published: &[Situation]) -> Result<(), TickError> {
    let mut membership: HashMap<(&str, &str, i64), usize> = HashMap::new();
    for situation in published {
        for episode in &situation.episodes {
            *membership
                .entry((episode.entity.as_str(), episode.fingerprint.as_str(), episode.start))
                .or_insert(0) += 1;
        }
    }
    for episode in live {
        let times = membership
            .get(&(episode.entity.as_str(), episode.fingerprint.as_str(), episode.start))
            .copied()
            .unwrap_or(0);
        if times != 1 {
            return Err(TickError::InvariantViolation(format!(
                "episode {} appears in {} published situations",
                episode.key(),
                times
            )));
        }
    }
    Ok(())
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Per-tick pipeline metrics, published alongside every situation snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    /// Monotonic tick index.
    pub tick: u64,
    /// Wall-clock time the tick took to process.
    pub processing_time_ms: u64,
    /// Rough estimate of retained pipeline state.
    pub memory_hint_mb: f64,
    /// Alerts entering the tick divided by the hop period.
    pub throughput_alerts_per_sec: f64,
    /// Share of the tick's input dropped as duplicates or suppressed flaps.
    pub dedup_rate_pct: f64,
    /// Mean primary-cause confidence across published situations, as a
    /// percentage. A heuristic stand-in; no ground truth exists in-process.
    pub correlation_accuracy_pct: f64,
    /// Situations in the published set.
    pub situation_count: usize,
    /// Live episodes at publication time.
    pub episode_count: usize,
}

/// Point-in-time copy of the process-lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Alerts rejected at ingress for missing or invalid timestamps.
    pub malformed_alerts: u64,
    /// Raw events rejected at ingress for missing or invalid timestamps.
    pub malformed_events: u64,
    /// Ingress records dropped because a bounded queue was full.
    pub queue_full_drops: u64,
    /// Alerts dropped as plain duplicates.
    pub duplicates_dropped: u64,
    /// Alerts suppressed after crossing the flap threshold.
    pub flap_suppressed: u64,
    /// Alerts discarded by the per-entity rate ceiling.
    pub rate_limited: u64,
    /// Ticks aborted by a transient stage failure.
    pub failed_ticks: u64,
    /// Ticks whose processing exceeded ten hop periods.
    pub tick_overruns: u64,
}

/// Process-lifetime counters shared between the ingress side and the
/// driver. All increments are relaxed; the counters are advisory.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    malformed_alerts: AtomicU64,
    malformed_events: AtomicU64,
    queue_full_drops: AtomicU64,
    duplicates_dropped: AtomicU64,
    flap_suppressed: AtomicU64,
    rate_limited: AtomicU64,
    failed_ticks: AtomicU64,
    tick_overruns: AtomicU64,
}

impl PipelineCounters {
    /// Records an alert rejected at ingress.
    pub fn record_malformed_alert(&self) {
        self.malformed_alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a raw event rejected at ingress.
    pub fn record_malformed_event(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an ingress record dropped on a full queue.
    pub fn record_queue_full(&self) {
        self.queue_full_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Records alerts dropped as plain duplicates.
    pub fn record_duplicates(&self, count: u64) {
        self.duplicates_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Records alerts suppressed as flaps.
    pub fn record_flap_suppressed(&self, count: u64) {
        self.flap_suppressed.fetch_add(count, Ordering::Relaxed);
    }

    /// Records alerts discarded by the rate ceiling.
    pub fn record_rate_limited(&self, count: u64) {
        self.rate_limited.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a tick aborted by a stage failure.
    pub fn record_failed_tick(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a tick that exceeded its processing budget.
    pub fn record_overrun(&self) {
        self.tick_overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            malformed_alerts: self.malformed_alerts.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            flap_suppressed: self.flap_suppressed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            tick_overruns: self.tick_overruns.load(Ordering::Relaxed),
        }
    }
}

//! Shared pipeline metrics and counters.

mod metrics;

pub use metrics::{CounterSnapshot, PipelineCounters, TickMetrics};

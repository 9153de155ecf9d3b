#![warn(missing_docs)]
//! Sitrep is a streaming alert-correlation engine for operations telemetry.
//! It collapses alert noise, groups related activity into bounded-duration
//! episodes, joins episodes into incident-level situations, and ranks each
//! situation by a composite causal-plausibility score on a fixed tick.

pub mod config;
pub mod context;
pub mod engine;
pub mod models;
pub mod pipeline;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

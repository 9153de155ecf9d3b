use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds, serialize_duration_to_ms,
    serialize_duration_to_seconds,
};
use crate::models::Severity;

/// Provides the default value for the retention window (15 minutes).
fn default_window_ms() -> i64 {
    900_000
}

/// Provides the default value for the tick hop (1 second).
fn default_hop() -> Duration {
    Duration::from_millis(1_000)
}

/// Provides the default value for the dedup TTL (2 minutes).
fn default_dedup_ttl_ms() -> i64 {
    120_000
}

/// Provides the default value for the episode gap (2 minutes).
fn default_episode_gap_ms() -> i64 {
    120_000
}

/// Provides the default value for the lead-lag search bound (1 minute).
fn default_max_lead_ms() -> i64 {
    60_000
}

/// Provides the default value for the situation lifetime (90 minutes).
fn default_max_situation_lifetime_ms() -> i64 {
    5_400_000
}

/// Provides the default value for the quiet threshold (15 minutes).
fn default_quiet_threshold_ms() -> i64 {
    900_000
}

/// Provides the default per-entity rate ceiling.
fn default_max_alerts_per_minute() -> usize {
    100
}

/// Provides the default flap-drop threshold.
fn default_flap_drop_threshold() -> u32 {
    3
}

/// Provides the default dedup-state max age (10 minutes).
fn default_dedup_max_age_ms() -> i64 {
    600_000
}

/// Provides the default ingress queue capacity for alerts.
fn default_alert_queue_capacity() -> usize {
    8_192
}

/// Provides the default ingress queue capacity for raw events.
fn default_event_queue_capacity() -> usize {
    4_096
}

/// Provides the default shutdown timeout.
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Weight table mapping severities onto a strict total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityWeights {
    /// Weight for `critical` alerts.
    pub critical: u32,
    /// Weight for `high` alerts.
    pub high: u32,
    /// Weight for `medium` alerts.
    pub medium: u32,
    /// Weight for `low` alerts.
    pub low: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self { critical: 4, high: 3, medium: 2, low: 1 }
    }
}

impl SeverityWeights {
    /// Weight of a severity. The mapping is total; anything that parsed to
    /// `low` carries the minimum weight.
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Runtime configuration for the correlation pipeline.
///
/// Established at start; merged updates are applied by the driver at tick
/// boundaries only, so a tick always runs under a single consistent config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retention horizon W for episodes feeding situation construction,
    /// in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Tick hop period H.
    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms",
        default = "default_hop"
    )]
    pub hop: Duration,

    /// TTL under which repeats of a dedup key collapse, in milliseconds.
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: i64,

    /// Gap G separating bursts at the same key into distinct episodes,
    /// in milliseconds.
    #[serde(default = "default_episode_gap_ms")]
    pub episode_gap_ms: i64,

    /// Maximum lag L searched by the lead-lag correlator, in milliseconds.
    #[serde(default = "default_max_lead_ms")]
    pub max_lead_ms: i64,

    /// Age past which a published situation's window end expires it,
    /// in milliseconds.
    #[serde(default = "default_max_situation_lifetime_ms")]
    pub max_situation_lifetime_ms: i64,

    /// How long a situation survives without being regenerated,
    /// in milliseconds.
    #[serde(default = "default_quiet_threshold_ms")]
    pub quiet_threshold_ms: i64,

    /// Per-entity alert ceiling within a sliding 60 s window.
    #[serde(default = "default_max_alerts_per_minute")]
    pub max_alerts_per_minute: usize,

    /// Status-toggle count at which a dedup key's repeats are suppressed.
    #[serde(default = "default_flap_drop_threshold")]
    pub flap_drop_threshold: u32,

    /// Severity weight table.
    #[serde(default)]
    pub severity_weights: SeverityWeights,

    /// Age past which idle dedup entries are garbage collected,
    /// in milliseconds.
    #[serde(default = "default_dedup_max_age_ms")]
    pub dedup_max_age_ms: i64,

    /// Capacity of the bounded alert ingress queue.
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,

    /// Capacity of the bounded raw-event ingress queue.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Maximum time to wait for the driver to drain on `stop`.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            hop: default_hop(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            episode_gap_ms: default_episode_gap_ms(),
            max_lead_ms: default_max_lead_ms(),
            max_situation_lifetime_ms: default_max_situation_lifetime_ms(),
            quiet_threshold_ms: default_quiet_threshold_ms(),
            max_alerts_per_minute: default_max_alerts_per_minute(),
            flap_drop_threshold: default_flap_drop_threshold(),
            severity_weights: SeverityWeights::default(),
            dedup_max_age_ms: default_dedup_max_age_ms(),
            alert_queue_capacity: default_alert_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The hop period must be strictly positive.
    #[error("hop must be greater than zero")]
    InvalidHop,

    /// The retention window must be strictly positive.
    #[error("window_ms must be greater than zero")]
    InvalidWindow,

    /// The episode gap must be strictly positive.
    #[error("episode_gap_ms must be greater than zero")]
    InvalidEpisodeGap,

    /// A duration option that must be non-negative was negative.
    #[error("{0} must not be negative")]
    NegativeDuration(&'static str),

    /// The per-entity rate ceiling must allow at least one alert.
    #[error("max_alerts_per_minute must be at least 1")]
    InvalidRateLimit,

    /// An ingress queue capacity must be strictly positive.
    #[error("queue capacities must be greater than zero")]
    InvalidQueueCapacity,

    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

impl PipelineConfig {
    /// Loads a configuration from a YAML file, falling back to defaults for
    /// absent options.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let loaded: Self = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validates the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hop.is_zero() {
            return Err(ConfigError::InvalidHop);
        }
        if self.window_ms <= 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if self.episode_gap_ms <= 0 {
            return Err(ConfigError::InvalidEpisodeGap);
        }
        if self.dedup_ttl_ms < 0 {
            return Err(ConfigError::NegativeDuration("dedup_ttl_ms"));
        }
        if self.max_lead_ms < 0 {
            return Err(ConfigError::NegativeDuration("max_lead_ms"));
        }
        if self.max_situation_lifetime_ms < 0 {
            return Err(ConfigError::NegativeDuration("max_situation_lifetime_ms"));
        }
        if self.quiet_threshold_ms < 0 {
            return Err(ConfigError::NegativeDuration("quiet_threshold_ms"));
        }
        if self.dedup_max_age_ms < 0 {
            return Err(ConfigError::NegativeDuration("dedup_max_age_ms"));
        }
        if self.max_alerts_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if self.alert_queue_capacity == 0 || self.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }

    /// The hop period in milliseconds.
    pub fn hop_ms(&self) -> i64 {
        self.hop.as_millis() as i64
    }
}

/// A partial configuration update carrying only the recognized runtime
/// options. Unset fields leave the running value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    /// New retention window, in milliseconds.
    pub window_ms: Option<i64>,
    /// New hop period, in milliseconds.
    pub hop_ms: Option<u64>,
    /// New dedup TTL, in milliseconds.
    pub dedup_ttl_ms: Option<i64>,
    /// New episode gap, in milliseconds.
    pub episode_gap_ms: Option<i64>,
    /// New lead-lag search bound, in milliseconds.
    pub max_lead_ms: Option<i64>,
    /// New situation lifetime, in milliseconds.
    pub max_situation_lifetime_ms: Option<i64>,
    /// New quiet threshold, in milliseconds.
    pub quiet_threshold_ms: Option<i64>,
    /// New per-entity rate ceiling.
    pub max_alerts_per_minute: Option<usize>,
    /// New flap-drop threshold.
    pub flap_drop_threshold: Option<u32>,
}

impl ConfigUpdate {
    /// Applies the update to a config, validating the merged result. On
    /// error the target is left unchanged.
    pub fn apply_to(&self, target: &mut PipelineConfig) -> Result<(), ConfigError> {
        let mut merged = target.clone();
        if let Some(window_ms) = self.window_ms {
            merged.window_ms = window_ms;
        }
        if let Some(hop_ms) = self.hop_ms {
            merged.hop = Duration::from_millis(hop_ms);
        }
        if let Some(dedup_ttl_ms) = self.dedup_ttl_ms {
            merged.dedup_ttl_ms = dedup_ttl_ms;
        }
        if let Some(episode_gap_ms) = self.episode_gap_ms {
            merged.episode_gap_ms = episode_gap_ms;
        }
        if let Some(max_lead_ms) = self.max_lead_ms {
            merged.max_lead_ms = max_lead_ms;
        }
        if let Some(lifetime) = self.max_situation_lifetime_ms {
            merged.max_situation_lifetime_ms = lifetime;
        }
        if let Some(quiet) = self.quiet_threshold_ms {
            merged.quiet_threshold_ms = quiet;
        }
        if let Some(rate) = self.max_alerts_per_minute {
            merged.max_alerts_per_minute = rate;
        }
        if let Some(flap) = self.flap_drop_threshold {
            merged.flap_drop_threshold = flap;
        }
        merged.validate()?;
        *target = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_hop_is_rejected_and_config_retained() {
        let mut config = PipelineConfig::default();
        let update = ConfigUpdate { hop_ms: Some(0), ..ConfigUpdate::default() };

        let result = update.apply_to(&mut config);

        assert!(matches!(result, Err(ConfigError::InvalidHop)));
        assert_eq!(config.hop, Duration::from_millis(1_000));
    }

    #[test]
    fn partial_update_merges_only_set_options() {
        let mut config = PipelineConfig::default();
        let update = ConfigUpdate {
            dedup_ttl_ms: Some(60_000),
            max_alerts_per_minute: Some(10),
            ..ConfigUpdate::default()
        };

        update.apply_to(&mut config).unwrap();

        assert_eq!(config.dedup_ttl_ms, 60_000);
        assert_eq!(config.max_alerts_per_minute, 10);
        assert_eq!(config.episode_gap_ms, 120_000);
        assert_eq!(config.window_ms, 900_000);
    }

    #[test]
    fn severity_weights_are_strictly_ordered_by_default() {
        let weights = SeverityWeights::default();
        assert!(weights.weight(Severity::Critical) > weights.weight(Severity::High));
        assert!(weights.weight(Severity::High) > weights.weight(Severity::Medium));
        assert!(weights.weight(Severity::Medium) > weights.weight(Severity::Low));
    }

    #[test]
    fn from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "window_ms: -5\n").unwrap();

        let result = PipelineConfig::from_file(path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::InvalidWindow)));
    }
}

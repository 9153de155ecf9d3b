//! Configuration module for the correlation pipeline.

mod helpers;
mod pipeline_config;
mod rule_loader;

pub use helpers::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds, serialize_duration_to_ms,
    serialize_duration_to_seconds,
};
pub use pipeline_config::{ConfigError, ConfigUpdate, PipelineConfig, SeverityWeights};
pub use rule_loader::{validate_rule, RuleConfigFile, RuleLoader, RuleLoaderError};

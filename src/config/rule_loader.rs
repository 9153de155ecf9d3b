use std::path::PathBuf;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ThresholdRule;

/// Container for threshold rules loaded from file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfigFile {
    /// The declared rules.
    pub rules: Vec<ThresholdRule>,
}

/// Loads threshold rule configurations from a YAML file.
pub struct RuleLoader {
    path: PathBuf,
}

/// Errors that can occur while loading threshold rules.
#[derive(Debug, Error)]
pub enum RuleLoaderError {
    /// Error when reading the rule configuration file.
    #[error("Failed to load rule configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when parsing the rule configuration file.
    #[error("Failed to parse rule configuration: {0}")]
    ParseError(String),

    /// Error when the rule configuration format is unsupported.
    #[error("Unsupported rule configuration format")]
    UnsupportedFormat,

    /// A rule failed semantic validation.
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// Name of the offending rule.
        rule: String,
        /// Why the rule was rejected.
        reason: String,
    },
}

impl RuleLoader {
    /// Creates a new `RuleLoader` instance.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads and validates the rule configuration from the specified file.
    pub fn load(&self) -> Result<Vec<ThresholdRule>, RuleLoaderError> {
        if !self.is_yaml_file() {
            return Err(RuleLoaderError::UnsupportedFormat);
        }

        let config_str = std::fs::read_to_string(&self.path)?;
        let config: RuleConfigFile = Config::builder()
            .add_source(File::from_str(&config_str, config::FileFormat::Yaml))
            .build()
            .map_err(|e| RuleLoaderError::ParseError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RuleLoaderError::ParseError(e.to_string()))?;

        for rule in &config.rules {
            validate_rule(rule)?;
        }

        Ok(config.rules)
    }

    /// Checks if the file has a YAML extension.
    fn is_yaml_file(&self) -> bool {
        matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

/// Semantic validation applied to every loaded rule.
pub fn validate_rule(rule: &ThresholdRule) -> Result<(), RuleLoaderError> {
    if rule.name.is_empty() {
        return Err(RuleLoaderError::InvalidRule {
            rule: "<unnamed>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }
    if rule.key.is_empty() {
        return Err(RuleLoaderError::InvalidRule {
            rule: rule.name.clone(),
            reason: "key must name at least one field selector".to_string(),
        });
    }
    if rule.threshold == 0 {
        return Err(RuleLoaderError::InvalidRule {
            rule: rule.name.clone(),
            reason: "threshold must be at least 1".to_string(),
        });
    }
    if rule.window_ms <= 0 {
        return Err(RuleLoaderError::InvalidRule {
            rule: rule.name.clone(),
            reason: "window_ms must be greater than zero".to_string(),
        });
    }
    if rule.cooldown_ms < 0 {
        return Err(RuleLoaderError::InvalidRule {
            rule: rule.name.clone(),
            reason: "cooldown_ms must not be negative".to_string(),
        });
    }
    Ok(())
}

use crate::models::{MatchSpec, Severity, ThresholdRule};

/// Builds [`ThresholdRule`] fixtures: threshold 1 on the involved object
/// name over a five-minute window with a ten-minute cooldown.
pub struct ThresholdRuleBuilder {
    rule: ThresholdRule,
}

impl ThresholdRuleBuilder {
    /// Starts a builder for a rule with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            rule: ThresholdRule {
                name: name.into(),
                key: vec!["involvedObject.name".to_string()],
                matchers: MatchSpec::default(),
                threshold: 1,
                severity: Severity::High,
                window_ms: 300_000,
                cooldown_ms: 600_000,
            },
        }
    }

    /// Replaces the grouping-key selectors.
    pub fn key(mut self, selectors: &[&str]) -> Self {
        self.rule.key = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Adds an exact-equality field predicate.
    pub fn field(mut self, selector: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.matchers.fields.insert(selector.into(), value.into());
        self
    }

    /// Sets the message substring predicate.
    pub fn message_contains(mut self, needle: impl Into<String>) -> Self {
        self.rule.matchers.message_contains = Some(needle.into());
        self
    }

    /// Sets the firing threshold.
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.rule.threshold = threshold;
        self
    }

    /// Sets the synthesized alert severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.rule.severity = severity;
        self
    }

    /// Sets the counting window.
    pub fn window_ms(mut self, window_ms: i64) -> Self {
        self.rule.window_ms = window_ms;
        self
    }

    /// Sets the post-firing cooldown.
    pub fn cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.rule.cooldown_ms = cooldown_ms;
        self
    }

    /// Builds the rule.
    pub fn build(self) -> ThresholdRule {
        self.rule
    }
}

//! The threshold engine: folds bursts of matching raw cluster events into
//! synthesized alerts using per-rule sliding windows and cooldowns.

use std::collections::{HashMap, VecDeque};

use crate::models::{Alert, AlertStatus, RawEvent, ThresholdRule};

/// Source tag stamped on synthesized alerts.
const SYNTHESIZED_SOURCE: &str = "k8s";

/// Sliding-window state for one `(rule, key)` pair.
#[derive(Debug, Default)]
struct RuleState {
    /// Timestamps of matching events inside the rule window, oldest first.
    timestamps: VecDeque<i64>,
    /// Epoch-ms time before which the rule stays silent for this key.
    cooldown_until: i64,
}

/// Converts raw cluster events into alerts via a declarative rule set.
///
/// State is keyed by `(rule, key)`; entries are pruned on every matching
/// event and evicted once their window empties and the cooldown elapses.
#[derive(Debug)]
pub struct ThresholdEngine {
    rules: Vec<ThresholdRule>,
    states: HashMap<String, RuleState>,
}

impl ThresholdEngine {
    /// Creates an engine over a fixed rule set.
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules, states: HashMap::new() }
    }

    /// Processes one tick's raw events, returning the alerts synthesized by
    /// rules whose thresholds were crossed outside their cooldowns.
    pub fn process(&mut self, events: &[RawEvent], now_ms: i64) -> Vec<Alert> {
        let mut synthesized = Vec::new();

        for event in events {
            for rule in &self.rules {
                if !rule.matches(event) {
                    continue;
                }

                let key = rule.composite_key(event);
                let state_key = format!("{}|{}", rule.name, key);
                let state = self.states.entry(state_key).or_default();

                state.timestamps.push_back(event.timestamp);
                let horizon = now_ms - rule.window_ms;
                while state.timestamps.front().is_some_and(|&ts| ts < horizon) {
                    state.timestamps.pop_front();
                }

                if state.timestamps.len() >= rule.threshold && now_ms >= state.cooldown_until {
                    synthesized.push(synthesize(rule, &key, event, &state.timestamps));
                    state.cooldown_until = now_ms + rule.cooldown_ms;
                    tracing::debug!(
                        rule = %rule.name,
                        key = %key,
                        count = state.timestamps.len(),
                        "threshold rule fired"
                    );
                }
            }
        }

        synthesized
    }

    /// Prunes aged window entries and evicts `(rule, key)` states whose
    /// sequence is empty and whose cooldown has elapsed.
    pub fn gc(&mut self, now_ms: i64) {
        let horizons: HashMap<&str, i64> = self
            .rules
            .iter()
            .map(|rule| (rule.name.as_str(), now_ms - rule.window_ms))
            .collect();

        self.states.retain(|state_key, state| {
            let rule_name = state_key.split('|').next().unwrap_or_default();
            if let Some(&horizon) = horizons.get(rule_name) {
                while state.timestamps.front().is_some_and(|&ts| ts < horizon) {
                    state.timestamps.pop_front();
                }
            }
            !(state.timestamps.is_empty() && now_ms >= state.cooldown_until)
        });
    }

    /// Number of live `(rule, key)` states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

/// Builds the synthesized alert for a fired rule.
fn synthesize(
    rule: &ThresholdRule,
    key: &str,
    event: &RawEvent,
    timestamps: &VecDeque<i64>,
) -> Alert {
    let first_ts = timestamps.front().copied();
    let last_ts = timestamps.back().copied();
    Alert {
        timestamp: last_ts.unwrap_or(event.timestamp),
        source: SYNTHESIZED_SOURCE.to_string(),
        id: None,
        fingerprint: format!("{}|{}", rule.name, key),
        title: rule.name.clone(),
        status: AlertStatus::Firing,
        severity: rule.severity,
        kind: "threshold".to_string(),
        entity_key: Some(key.to_string()),
        service: None,
        component: None,
        resource: None,
        namespace: (!event.namespace.is_empty()).then(|| event.namespace.clone()),
        pod: None,
        host: None,
        region: None,
        cluster: None,
        deploy_key: None,
        net_key: None,
        k8s_key: Some(key.to_string()),
        tags: HashMap::new(),
        count: timestamps.len() as u64,
        first_ts,
        last_ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RawEventBuilder, ThresholdRuleBuilder};

    fn crashloop_rule(threshold: usize) -> ThresholdRule {
        ThresholdRuleBuilder::new("pod-crashloop")
            .key(&["involvedObject.name", "namespace"])
            .field("reason", "BackOff")
            .threshold(threshold)
            .window_ms(300_000)
            .cooldown_ms(600_000)
            .build()
    }

    fn backoff(ts: i64, pod: &str) -> RawEvent {
        RawEventBuilder::new("BackOff")
            .timestamp(ts)
            .object("Pod", pod)
            .namespace("prod")
            .build()
    }

    #[test]
    fn fires_once_threshold_is_reached() {
        let mut engine = ThresholdEngine::new(vec![crashloop_rule(3)]);
        let now = 100_000;
        let events =
            vec![backoff(95_000, "api-0"), backoff(96_000, "api-0"), backoff(97_000, "api-0")];

        let alerts = engine.process(&events, now);

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.fingerprint, "pod-crashloop|api-0|prod");
        assert_eq!(alert.entity(), "api-0|prod");
        assert_eq!(alert.count, 3);
        assert_eq!(alert.first_ts, Some(95_000));
        assert_eq!(alert.last_ts, Some(97_000));
        assert_eq!(alert.source, "k8s");
    }

    #[test]
    fn cooldown_silences_repeat_firings() {
        let mut engine = ThresholdEngine::new(vec![crashloop_rule(2)]);

        let first = engine.process(&[backoff(1_000, "api-0"), backoff(2_000, "api-0")], 10_000);
        assert_eq!(first.len(), 1);

        // Still inside the cooldown epoch: more matches stay silent.
        let second = engine.process(&[backoff(20_000, "api-0"), backoff(21_000, "api-0")], 30_000);
        assert!(second.is_empty());

        // Past the cooldown, the rule may fire again.
        let third =
            engine.process(&[backoff(700_000, "api-0"), backoff(700_500, "api-0")], 700_500);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn threshold_of_one_fires_on_first_match_per_epoch() {
        let rule = ThresholdRuleBuilder::new("oom")
            .key(&["involvedObject.name"])
            .message_contains("OOM")
            .threshold(1)
            .window_ms(60_000)
            .cooldown_ms(120_000)
            .build();
        let mut engine = ThresholdEngine::new(vec![rule]);
        let event = RawEventBuilder::new("Killing")
            .timestamp(1_000)
            .object("Pod", "api-0")
            .message("container OOMKilled")
            .build();

        let alerts = engine.process(std::slice::from_ref(&event), 1_000);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 1);

        let muted = engine.process(&[event], 2_000);
        assert!(muted.is_empty());
    }

    #[test]
    fn keys_are_tracked_independently() {
        let mut engine = ThresholdEngine::new(vec![crashloop_rule(2)]);
        let events = vec![
            backoff(1_000, "api-0"),
            backoff(1_500, "db-0"),
            backoff(2_000, "api-0"),
            backoff(2_500, "db-0"),
        ];

        let alerts = engine.process(&events, 5_000);

        assert_eq!(alerts.len(), 2);
        let mut fingerprints: Vec<&str> =
            alerts.iter().map(|a| a.fingerprint.as_str()).collect();
        fingerprints.sort();
        assert_eq!(fingerprints, vec!["pod-crashloop|api-0|prod", "pod-crashloop|db-0|prod"]);
    }

    #[test]
    fn aged_entries_fall_out_of_the_window() {
        let mut engine = ThresholdEngine::new(vec![crashloop_rule(3)]);

        // Two old matches, then one far past the window: never reaches 3.
        engine.process(&[backoff(1_000, "api-0"), backoff(2_000, "api-0")], 2_000);
        let alerts = engine.process(&[backoff(400_000, "api-0")], 400_000);
        assert!(alerts.is_empty());
    }

    #[test]
    fn gc_evicts_idle_states_after_cooldown() {
        let mut engine = ThresholdEngine::new(vec![crashloop_rule(2)]);
        engine.process(&[backoff(1_000, "api-0"), backoff(2_000, "api-0")], 2_000);
        assert_eq!(engine.state_count(), 1);

        // Window drained but cooldown still pending: state survives.
        engine.gc(400_000);
        assert_eq!(engine.state_count(), 1);

        // Cooldown elapsed and window empty: state reclaimed.
        engine.gc(700_000);
        assert_eq!(engine.state_count(), 0);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let events: Vec<RawEvent> =
            (0..10).map(|i| backoff(1_000 + i * 500, "api-0")).collect();

        let mut first = ThresholdEngine::new(vec![crashloop_rule(4)]);
        let mut second = ThresholdEngine::new(vec![crashloop_rule(4)]);

        assert_eq!(first.process(&events, 10_000), second.process(&events, 10_000));
    }
}

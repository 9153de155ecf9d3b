//! The `Correlator` handle: the contract the pipeline exposes to ingest
//! transports, presentation layers, and the embedder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{read_lock, write_lock, PipelineDriver, SharedState, Subscriber};
use crate::config::{
    validate_rule, ConfigError, ConfigUpdate, PipelineConfig, RuleLoader, RuleLoaderError,
};
use crate::context::{CounterSnapshot, TickMetrics};
use crate::models::{
    Alert, GraphHints, RawEvent, Situation, SituationSnapshot, ThresholdRule,
};

/// Errors surfaced while constructing a [`Correlator`].
#[derive(Debug, Error)]
pub enum CorrelatorError {
    /// The supplied pipeline configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A threshold rule failed validation or could not be loaded.
    #[error("invalid threshold rules: {0}")]
    Rules(#[from] RuleLoaderError),
}

/// Live ingress endpoints while the pipeline is running.
struct Ingress {
    alerts_tx: mpsc::Sender<Alert>,
    events_tx: mpsc::Sender<RawEvent>,
}

/// The running driver task and its cancellation token.
struct Runtime {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner-facing handle over the correlation pipeline.
///
/// The handle is cheap to share behind an `Arc`; every method takes `&self`.
/// Ingestion never blocks: full queues and malformed records are dropped
/// with a counter increment. Config and graph updates land at the next tick
/// boundary.
pub struct Correlator {
    shared: Arc<SharedState>,
    rules: Vec<ThresholdRule>,
    ingress: RwLock<Option<Ingress>>,
    snapshot_rx: RwLock<watch::Receiver<SituationSnapshot>>,
    runtime: Mutex<Option<Runtime>>,
    ingested_by_source: DashMap<String, u64>,
}

impl Correlator {
    /// Returns a new `CorrelatorBuilder` instance.
    pub fn builder() -> CorrelatorBuilder {
        CorrelatorBuilder::default()
    }

    /// Starts the pipeline driver. Idempotent: starting a running
    /// correlator is a no-op, and a stopped correlator can be started
    /// again (stage state begins empty; the last published snapshot is
    /// carried over so consumers never observe a gap).
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            tracing::debug!("correlator already running");
            return;
        }

        let config = self.shared.config_snapshot();
        let (alerts_tx, alerts_rx) = mpsc::channel(config.alert_queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.current_snapshot());
        let cancel = CancellationToken::new();

        let driver = PipelineDriver::new(
            Arc::clone(&self.shared),
            self.rules.clone(),
            alerts_rx,
            events_rx,
            snapshot_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(driver.run());

        *write_lock(&self.ingress) = Some(Ingress { alerts_tx, events_tx });
        *write_lock(&self.snapshot_rx) = snapshot_rx;
        *runtime = Some(Runtime { cancel, task });
        tracing::info!("correlator started");
    }

    /// Stops the pipeline driver, draining any in-flight tick to completion
    /// and discarding alerts still queued at ingress.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        let Some(Runtime { cancel, mut task }) = runtime.take() else {
            tracing::debug!("correlator is not running");
            return;
        };

        *write_lock(&self.ingress) = None;
        cancel.cancel();

        let timeout = self.shared.config_snapshot().shutdown_timeout;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => tracing::info!("correlator stopped"),
            Ok(Err(error)) => {
                tracing::error!(error = %error, "pipeline driver task failed during shutdown")
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "pipeline driver did not drain within the shutdown timeout; aborting"
                );
                task.abort();
            }
        }
    }

    /// Enqueues a single alert. Returns immediately; thread-safe with
    /// respect to the driver.
    pub fn ingest(&self, alert: Alert) {
        if alert.timestamp <= 0 {
            self.shared.counters.record_malformed_alert();
            tracing::debug!(
                fingerprint = %alert.fingerprint,
                "dropping alert with a missing or invalid timestamp"
            );
            return;
        }
        *self.ingested_by_source.entry(alert.source.clone()).or_insert(0) += 1;

        let ingress = read_lock(&self.ingress);
        let Some(ingress) = ingress.as_ref() else {
            tracing::debug!("correlator is not running, dropping alert");
            return;
        };
        match ingress.alerts_tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.counters.record_queue_full();
                tracing::warn!("alert ingress queue full, dropping alert");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("pipeline driver is gone, dropping alert");
            }
        }
    }

    /// Enqueues a raw cluster event for the threshold engine. Returns
    /// immediately; thread-safe with respect to the driver.
    pub fn ingest_raw_event(&self, event: RawEvent) {
        if event.timestamp <= 0 {
            self.shared.counters.record_malformed_event();
            tracing::debug!(
                reason = %event.reason,
                "dropping raw event with a missing or invalid timestamp"
            );
            return;
        }

        let ingress = read_lock(&self.ingress);
        let Some(ingress) = ingress.as_ref() else {
            tracing::debug!("correlator is not running, dropping raw event");
            return;
        };
        match ingress.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.counters.record_queue_full();
                tracing::warn!("raw-event ingress queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("pipeline driver is gone, dropping raw event");
            }
        }
    }

    /// Atomically replaces the graph hints used by the scorer. The driver
    /// picks the new graph up at the next tick boundary.
    pub fn update_graph_hints(&self, hints: GraphHints) {
        *write_lock(&self.shared.graph) = Arc::new(hints);
        tracing::debug!("graph hints replaced");
    }

    /// Merges the recognized options of a partial update into the running
    /// configuration. Invalid updates are rejected whole and the prior
    /// configuration is retained. Accepted updates take effect at the next
    /// tick boundary.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let mut config = write_lock(&self.shared.config);
        update.apply_to(&mut config)?;
        tracing::info!("pipeline configuration updated");
        Ok(())
    }

    /// Registers a consumer invoked at most once per tick with the
    /// published situation set and the tick's metrics.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&[Situation], &TickMetrics) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(callback);
        write_lock(&self.shared.subscribers).push(subscriber);
    }

    /// Synchronous snapshot of the latest published situation set.
    pub fn current_situations(&self) -> Vec<Situation> {
        read_lock(&self.snapshot_rx).borrow().situations.as_ref().clone()
    }

    /// The latest published snapshot, including tick metrics.
    pub fn current_snapshot(&self) -> SituationSnapshot {
        read_lock(&self.snapshot_rx).borrow().clone()
    }

    /// Point-in-time copy of the pipeline's drop and failure counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Alerts accepted at ingress, by source tag.
    pub fn ingested_by_source(&self) -> HashMap<String, u64> {
        self.ingested_by_source
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// True while the pipeline driver is running.
    pub fn is_running(&self) -> bool {
        read_lock(&self.ingress).is_some()
    }
}

/// Assembles a [`Correlator`] from a configuration and a threshold rule
/// set, validating both.
#[derive(Default)]
pub struct CorrelatorBuilder {
    config: Option<PipelineConfig>,
    rules: Vec<ThresholdRule>,
}

impl CorrelatorBuilder {
    /// Sets the pipeline configuration (defaults apply otherwise).
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds threshold rules.
    pub fn rules(mut self, rules: Vec<ThresholdRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Loads threshold rules from a YAML file and adds them.
    pub fn rule_file(mut self, path: impl Into<PathBuf>) -> Result<Self, CorrelatorError> {
        let rules = RuleLoader::new(path.into()).load()?;
        self.rules.extend(rules);
        Ok(self)
    }

    /// Validates everything and builds the handle (stopped; call `start`).
    pub fn build(self) -> Result<Correlator, CorrelatorError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        for rule in &self.rules {
            validate_rule(rule)?;
        }

        // Placeholder channel so snapshot reads work before the first start.
        let (_snapshot_tx, snapshot_rx) = watch::channel(SituationSnapshot::default());

        Ok(Correlator {
            shared: Arc::new(SharedState::new(config)),
            rules: self.rules,
            ingress: RwLock::new(None),
            snapshot_rx: RwLock::new(snapshot_rx),
            runtime: Mutex::new(None),
            ingested_by_source: DashMap::new(),
        })
    }
}

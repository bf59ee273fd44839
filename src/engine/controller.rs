//! Controller: owns the worker registry, drives the state machine, runs
//! assignment rounds and watches the inventory for upstream changes.
//!
//! Everything that mutates controller state runs on the one task that calls
//! [`Controller::run`]. Control-channel payloads arrive through a
//! single-consumer queue, so registry events are applied strictly in order
//! and never while an assignment round is in flight.

use indexmap::IndexSet;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info};

use super::assign::{AssignmentSummary, assign_tasks};
use super::state::{ControllerState, StateMachine};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::{InventorySource, SnapshotLayout, content_digest, store_inventory};
use crate::model::{ControlAction, ControlMessage};
use crate::store::{SharedStore, Subscription};
use crate::telemetry::controller::start_inventory_span;
use crate::telemetry::metrics;

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Channel workers announce themselves on.
    pub control_channel: String,
    pub layout: SnapshotLayout,
    /// Quiet period after the last registry event before assigning.
    pub debounce_interval: Duration,
    /// Cadence of the inventory change check.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_channel: "reg-bot-controller".to_string(),
            layout: SnapshotLayout::default(),
            debounce_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(120),
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            debounce_interval: config.debounce_interval,
            poll_interval: config.poll_interval,
            ..Self::default()
        }
    }
}

pub struct Controller {
    source: Arc<dyn InventorySource>,
    store: Arc<dyn SharedStore>,
    config: ControllerConfig,
    machine: StateMachine,
    /// Registered worker channels, in registration order.
    registry: IndexSet<String>,
    /// Digest of the adopted snapshot.
    digest: Option<String>,
    subscription: Option<Subscription>,
    state_tx: watch::Sender<ControllerState>,
    shutdown: Arc<Notify>,
}

impl Controller {
    pub fn new(
        source: Arc<dyn InventorySource>,
        store: Arc<dyn SharedStore>,
        config: ControllerConfig,
    ) -> Self {
        let machine = StateMachine::new(config.debounce_interval);
        let (state_tx, _) = watch::channel(machine.state());
        Self {
            source,
            store,
            config,
            machine,
            registry: IndexSet::new(),
            digest: None,
            subscription: None,
            state_tx,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.machine.state()
    }

    /// Follow state changes from another task.
    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// Registered worker channels, in registration order.
    pub fn workers(&self) -> Vec<String> {
        self.registry.iter().cloned().collect()
    }

    /// Digest of the adopted inventory snapshot.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// When the pending assignment round is due, if one is armed.
    pub fn assignment_deadline(&self) -> Option<Instant> {
        self.machine.deadline()
    }

    /// Handle that stops [`run`](Self::run) when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Load and store the first snapshot, then subscribe to the control channel.
    ///
    /// An empty inventory is a successful load: the controller becomes ready
    /// and adopts rows on a later poll. This differs from the legacy reg-bot
    /// controller, which stayed unready on an empty result. Returns the number of
    /// subscribers loaded. Called once.
    pub async fn initialize(&mut self) -> Result<usize> {
        if self.state() != ControllerState::Initializing {
            return Err(Error::Invariant(format!(
                "initialize called in state {}",
                self.state()
            )));
        }

        let records = self.source.retrieve_all().await?;
        let digest = content_digest(&records)?;
        store_inventory(self.store.as_ref(), &self.config.layout, &records).await?;
        info!(users = records.len(), digest = %digest, "adopted initial inventory");
        self.digest = Some(digest);

        self.subscription = Some(self.store.subscribe(&self.config.control_channel).await?);
        self.machine.mark_ready()?;
        self.publish_state();
        Ok(records.len())
    }

    /// Ready check: the controller must be `Idle` before it runs.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.state() == ControllerState::Idle && self.subscription.is_some() {
            Ok(())
        } else {
            Err(Error::Invariant(format!(
                "controller not ready (state {})",
                self.state()
            )))
        }
    }

    /// Run the controller loop until shutdown.
    ///
    /// Requires a completed [`initialize`](Self::initialize); a round left
    /// pending by an earlier shutdown resumes. Stops with an error on an
    /// illegal state transition or if the control-channel subscription closes.
    pub async fn run(&mut self) -> Result<()> {
        if self.state() == ControllerState::Initializing {
            return Err(Error::Invariant("controller not initialized".to_string()));
        }
        let mut subscription = self
            .subscription
            .take()
            .ok_or_else(|| Error::Invariant("no control channel subscription".to_string()))?;
        let shutdown = Arc::clone(&self.shutdown);

        let period = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            channel = subscription.channel(),
            debounce_ms = self.config.debounce_interval.as_millis() as u64,
            poll_ms = period.as_millis() as u64,
            "controller started"
        );

        let result = loop {
            let deadline = self.machine.deadline();
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("controller shutting down");
                    break Ok(());
                }
                // A due round goes before queued messages.
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.run_due_assignment().await {
                        break Err(e);
                    }
                }
                msg = subscription.recv() => match msg {
                    Some(payload) => {
                        if let Err(e) = self.handle_message(&payload) {
                            break Err(e);
                        }
                    }
                    None => {
                        break Err(Error::StoreUnavailable(
                            "control channel subscription closed".to_string(),
                        ));
                    }
                },
                _ = poll.tick() => match self.check_inventory().await {
                    Ok(_) => {}
                    Err(e @ Error::InvalidTransition { .. }) => break Err(e),
                    Err(e) => error!(fatal = e.is_fatal(), "inventory check failed: {e}"),
                },
            }
        };

        self.subscription = Some(subscription);
        result
    }

    /// Apply one control-channel payload.
    ///
    /// Malformed or unrecognized messages are logged and dropped. Only an
    /// illegal state transition is returned as an error.
    pub fn handle_message(&mut self, payload: &str) -> Result<()> {
        debug!(payload, "control message");
        let msg: ControlMessage = match serde_json::from_str(payload) {
            Ok(m) => m,
            Err(e) => {
                error!(payload, "error parsing control message: {e}");
                count_event("unknown", "invalid");
                return Ok(());
            }
        };

        match msg.parsed_action() {
            Some(ControlAction::Register) => self.register(msg.channel()),
            Some(ControlAction::Unregister) => self.unregister(msg.channel()),
            None => {
                info!(action = ?msg.action, "invalid or missing action");
                count_event("unknown", "invalid");
                Ok(())
            }
        }
    }

    fn register(&mut self, channel: Option<&str>) -> Result<()> {
        let Some(channel) = channel else {
            info!("channel is missing from register message");
            count_event("register", "ignored");
            return Ok(());
        };
        if self.registry.contains(channel) {
            debug!(channel, "got a checkin");
            count_event("register", "duplicate");
            return Ok(());
        }

        self.registry.insert(channel.to_string());
        info!(channel, workers = self.registry.len(), "got new register for channel");
        count_event("register", "registered");
        self.machine
            .registry_changed(Instant::now(), self.registry.len())?;
        self.publish_state();
        Ok(())
    }

    fn unregister(&mut self, channel: Option<&str>) -> Result<()> {
        let Some(channel) = channel else {
            info!("channel is missing from unregister message");
            count_event("unregister", "ignored");
            return Ok(());
        };
        if !self.registry.shift_remove(channel) {
            info!(channel, "unknown channel is unregistering");
            count_event("unregister", "ignored");
            return Ok(());
        }

        info!(channel, workers = self.registry.len(), "got unregister for channel");
        count_event("unregister", "unregistered");
        self.machine
            .registry_changed(Instant::now(), self.registry.len())?;
        self.publish_state();
        Ok(())
    }

    /// Run the pending assignment round if its window has elapsed.
    ///
    /// Round failures are logged and swallowed; the state always ends at
    /// `Idle`. Returns `None` when nothing was due.
    pub async fn run_due_assignment(&mut self) -> Result<Option<AssignmentSummary>> {
        if !self.machine.begin_assignment(Instant::now())? {
            return Ok(None);
        }
        self.publish_state();

        let workers = self.workers();
        let started = Instant::now();
        let summary = match assign_tasks(self.store.as_ref(), &self.config.layout, &workers).await
        {
            Ok(summary) => {
                let result = if summary.workers_assigned == 0 { "noop" } else { "ok" };
                metrics::assignment_rounds().add(1, &[KeyValue::new("result", result)]);
                summary
            }
            Err(e) => {
                error!("error assigning tasks to workers: {e}");
                metrics::assignment_rounds().add(1, &[KeyValue::new("result", "error")]);
                AssignmentSummary::default()
            }
        };
        metrics::assignment_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        self.machine.finish_assignment()?;
        self.publish_state();
        Ok(Some(summary))
    }

    /// Re-read the inventory and adopt it if its digest changed.
    ///
    /// Adopting a new snapshot clears the registry, so no round runs until
    /// workers register again. If storing the snapshot fails the digest is
    /// forgotten, so the next successful poll rewrites the store whatever it
    /// returns. Returns whether the inventory changed.
    pub async fn check_inventory(&mut self) -> Result<bool> {
        let span = start_inventory_span();
        let changed = async {
            let records = self.source.retrieve_all().await?;
            let digest = content_digest(&records)?;
            if self.digest.as_deref() == Some(digest.as_str()) {
                debug!(users = records.len(), "inventory unchanged");
                return Ok::<_, Error>(false);
            }

            if let Err(e) = store_inventory(self.store.as_ref(), &self.config.layout, &records).await
            {
                // The stored snapshot may be partly rewritten; adopt again on the next poll.
                self.digest = None;
                return Err(e);
            }
            info!(
                users = records.len(),
                previous = self.digest.as_deref().unwrap_or("-"),
                digest = %digest,
                dropped_workers = self.registry.len(),
                "inventory changed, workers must re-register"
            );
            self.digest = Some(digest);
            self.registry.clear();
            Ok(true)
        }
        .instrument(span.clone())
        .await;

        let result = match &changed {
            Ok(true) => "changed",
            Ok(false) => "unchanged",
            Err(_) => "error",
        };
        span.record("inventory.changed", result);
        metrics::inventory_polls().add(1, &[KeyValue::new("result", result)]);

        let changed = changed?;
        if changed {
            self.machine.registry_cleared()?;
            self.publish_state();
        }
        Ok(changed)
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.machine.state());
    }
}

fn count_event(action: &'static str, result: &'static str) {
    metrics::registry_events().add(
        1,
        &[
            KeyValue::new("action", action),
            KeyValue::new("result", result),
        ],
    );
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.machine.state())
            .field("workers", &self.registry)
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

//! StateEngine - Actor owning the switch bank
//!
//! The engine owns the [`ChannelStore`] and the periodic broadcast timer and
//! processes commands one at a time, so no locking is needed around the
//! store.
//!
//! # Broadcast rules
//!
//! - every accepted request is echoed to the data model, changed or not
//! - a request that changes a value triggers one immediate bus broadcast of
//!   the TTL-filtered bank and restarts the periodic timer
//! - the periodic tick broadcasts the TTL-filtered bank (if non-empty) and
//!   publishes every known value to the data model, TTL ignored
//!
//! Restarting the timer on each change means a burst of changes is followed
//! by one periodic tick `send_rate` after the last change, not by a tick on
//! the earlier schedule.

use super::commands::{EngineCommand, SwitchSink};
use super::engine_handle::EngineHandle;
use super::persistence_actor::PersistenceHandle;
use super::store::ChannelStore;
use super::types::{ApplyOutcome, ChangeRequest, ChannelConfig, PowerState, PowerUpPolicy, SwitchState};
use crate::error::{EngineError, ValidationError};
use crate::protocol::translator::{to_broadcast, Translator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Timing settings of the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Period of the status broadcast
    pub send_rate: Duration,
    /// Broadcast TTL in seconds (0 = never expire)
    pub state_ttl_secs: u64,
    /// Source label stamped on data-model deltas
    pub source: String,
}

/// Actor responsible for the canonical switch state
pub struct StateEngine {
    settings: EngineSettings,
    translator: Translator,
    store: ChannelStore,
    sink: Arc<dyn SwitchSink>,
    persistence: PersistenceHandle,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    change_count: u64,
    broadcast_count: u64,
}

impl StateEngine {
    /// Initialize the store from `configs` and `prior`, then spawn the engine
    pub fn spawn(
        settings: EngineSettings,
        translator: Translator,
        configs: &[ChannelConfig],
        prior: &PowerState,
        sink: Arc<dyn SwitchSink>,
        persistence: PersistenceHandle,
    ) -> EngineHandle {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();

        let mut store = ChannelStore::new();
        store.initialize(configs, prior, Instant::now());

        info!(
            instance = translator.instance(),
            channels = store.len(),
            send_rate_secs = settings.send_rate.as_secs_f64(),
            state_ttl_secs = settings.state_ttl_secs,
            "State engine initialized"
        );

        let engine = StateEngine {
            settings,
            translator,
            store,
            sink,
            persistence,
            command_rx,
            change_count: 0,
            broadcast_count: 0,
        };

        tokio::spawn(engine.run());

        EngineHandle::new(cmd_tx)
    }

    async fn run(mut self) {
        debug!("State engine run loop started");

        let send_rate = self.settings.send_rate;
        let tick = tokio::time::sleep(send_rate);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                biased;

                () = &mut tick => {
                    self.handle_tick();
                    tick.as_mut().reset(Instant::now() + send_rate);
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All engine handles dropped");
                        break;
                    };
                    trace!(?cmd, "Processing command");

                    match cmd {
                        EngineCommand::Apply { request, response } => {
                            let result = self.handle_apply(request);
                            if matches!(result, Ok(ApplyOutcome::Changed { .. })) {
                                tick.as_mut().reset(Instant::now() + send_rate);
                            }
                            let _ = response.send(result);
                        }
                        EngineCommand::ListChannels { response } => {
                            let _ = response.send(self.store.views(Instant::now()));
                        }
                        EngineCommand::Snapshot { response } => {
                            let snapshot = self.store.snapshot(self.settings.state_ttl_secs, Instant::now());
                            let _ = response.send(snapshot);
                        }
                        EngineCommand::Shutdown { response } => {
                            self.handle_shutdown().await;
                            let _ = response.send(());
                            return;
                        }
                    }
                }
            }
        }

        self.handle_shutdown().await;
    }

    /// Apply one canonical change request
    fn handle_apply(&mut self, request: ChangeRequest) -> Result<ApplyOutcome, EngineError> {
        let instance = self.translator.instance();
        if request.instance != instance {
            return Err(ValidationError::InstanceMismatch {
                expected: instance,
                actual: request.instance as i64,
            }
            .into());
        }

        let (current_state, power_up) = self
            .store
            .get(request.channel)
            .map(|c| (c.state, c.power_up))
            .ok_or(EngineError::UnknownChannel(request.channel))?;

        let now = Instant::now();

        self.sink.publish(
            self.translator
                .to_delta(&self.settings.source, [(request.channel, request.on)]),
        );
        self.store.touch(request.channel, now)?;

        let new_state = SwitchState::from_bool(request.on);
        if current_state == new_state {
            trace!(
                channel = request.channel,
                origin = %request.origin,
                state = %new_state,
                "Switch unchanged"
            );
            return Ok(ApplyOutcome::Unchanged);
        }

        let previous = self.store.set(request.channel, new_state, now)?;
        self.change_count += 1;

        info!(
            channel = request.channel,
            origin = %request.origin,
            %previous,
            state = %new_state,
            "Switch changed"
        );

        if power_up == PowerUpPolicy::RestorePrevious {
            self.persistence.save(self.store.power_state());
        }

        self.broadcast(now);

        Ok(ApplyOutcome::Changed { previous })
    }

    /// Periodic status: TTL-filtered bus broadcast plus full data-model refresh
    fn handle_tick(&mut self) {
        let now = Instant::now();
        trace!("Periodic tick");

        self.broadcast(now);

        let values: Vec<(u8, bool)> = self
            .store
            .values()
            .into_iter()
            .map(|(channel, on)| (channel.index, on))
            .collect();
        if !values.is_empty() {
            self.sink
                .publish(self.translator.to_delta(&self.settings.source, values));
        }
    }

    /// Emit the TTL-filtered bank on the bus, unless nothing is left to send
    fn broadcast(&mut self, now: Instant) {
        let snapshot = self.store.snapshot(self.settings.state_ttl_secs, now);

        match to_broadcast(self.translator.instance(), &snapshot) {
            Some(msg) => {
                self.broadcast_count += 1;
                debug!(channels = snapshot.len(), "Sending switch bank status");
                self.sink.broadcast(msg);
            }
            None => trace!("No live channels, status broadcast suppressed"),
        }
    }

    async fn handle_shutdown(&mut self) {
        info!(
            changes = self.change_count,
            broadcasts = self.broadcast_count,
            "State engine shutting down"
        );

        if !self.store.is_empty() {
            self.persistence.save(self.store.power_state());
        }
        if let Err(e) = self.persistence.flush().await {
            warn!("Final power-down state flush failed: {}", e);
        }
        self.persistence.shutdown();
        self.store.clear();
    }
}

//! Gateway - wires the engine to the bus transport and the data model
//!
//! Inbound, the gateway subscribes to the bus and to the data-model paths of
//! the virtual instance, translates what arrives and hands the resulting
//! change requests to the engine. Outbound, [`Outbound`] implements the
//! engine's [`SwitchSink`] on top of the same transports.

pub mod memory;
pub mod transport;

pub use memory::{MemoryBus, MemoryDataModel};
pub use transport::{
    ActionHandler, ActionResult, BusTransport, CancelHandle, DataModel, Subscription,
};

use crate::protocol::{bank_pattern, BusMessage, DataModelUpdate, Delta, SwitchPath, Translator};
use crate::state::{ChangeRequest, EngineHandle, SwitchSink};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Source label used when none is configured
pub const DEFAULT_SOURCE: &str = "n2k-virtual-switch";

/// Period requested for the data-model subscription
pub const SUBSCRIBE_PERIOD: Duration = Duration::from_millis(1000);

/// Engine output routed onto the transports
pub struct Outbound {
    bus: Arc<dyn BusTransport>,
    data_model: Arc<dyn DataModel>,
}

impl Outbound {
    pub fn new(bus: Arc<dyn BusTransport>, data_model: Arc<dyn DataModel>) -> Self {
        Self { bus, data_model }
    }
}

impl SwitchSink for Outbound {
    fn broadcast(&self, msg: BusMessage) {
        self.bus.emit(msg);
    }

    fn publish(&self, delta: Delta) {
        self.data_model.publish(delta);
    }
}

type Registrations = Arc<Mutex<HashMap<(String, String), CancelHandle>>>;

/// Running gateway; dropping it without [`Gateway::shutdown`] leaves tasks running
pub struct Gateway {
    subscriptions: Vec<CancelHandle>,
    registrations: Registrations,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Subscribe to both transports and start forwarding into `engine`
    pub fn start(
        engine: EngineHandle,
        translator: Translator,
        bus: Arc<dyn BusTransport>,
        data_model: Arc<dyn DataModel>,
        source: &str,
    ) -> Self {
        let registrations: Registrations = Arc::new(Mutex::new(HashMap::new()));
        let (action_tx, action_rx) = mpsc::unbounded_channel();

        let bus_sub = bus.subscribe();
        let pattern = bank_pattern(translator.instance());
        let dm_sub = data_model.subscribe(&pattern, SUBSCRIBE_PERIOD);

        info!(
            instance = translator.instance(),
            pattern = %pattern,
            source,
            "Gateway started"
        );

        let subscriptions = vec![bus_sub.handle, dm_sub.handle];

        let tasks = vec![
            tokio::spawn(run_bus_inbound(
                bus_sub.rx,
                translator.clone(),
                engine.clone(),
            )),
            tokio::spawn(run_data_model_inbound(
                DataModelInbound {
                    translator: translator.clone(),
                    engine: engine.clone(),
                    data_model,
                    source: source.to_string(),
                    registrations: registrations.clone(),
                    action_tx,
                },
                dm_sub.rx,
            )),
            tokio::spawn(run_actions(action_rx, engine)),
        ];

        Self {
            subscriptions,
            registrations,
            tasks,
        }
    }

    /// Number of distinct (path, source) action handlers registered
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Cancel every subscription and registration, then stop the tasks
    pub async fn shutdown(self) {
        for handle in self.subscriptions {
            debug!(handle = handle.label(), "Cancelling");
            handle.cancel();
        }

        let registered: Vec<_> = self.registrations.lock().drain().collect();
        for (_, handle) in registered {
            debug!(handle = handle.label(), "Cancelling");
            handle.cancel();
        }

        for task in self.tasks {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Gateway task panicked: {}", e);
                }
            }
        }

        info!("Gateway stopped");
    }
}

async fn submit(engine: &EngineHandle, request: ChangeRequest) {
    let channel = request.channel;
    let origin = request.origin;
    match engine.apply(request).await {
        Ok(outcome) => trace!(channel, %origin, ?outcome, "Change applied"),
        Err(e) => warn!(channel, %origin, "Change rejected: {}", e),
    }
}

async fn run_bus_inbound(
    mut rx: mpsc::UnboundedReceiver<BusMessage>,
    translator: Translator,
    engine: EngineHandle,
) {
    while let Some(msg) = rx.recv().await {
        match translator.from_bus(&msg) {
            Ok(Some(request)) => submit(&engine, request).await,
            Ok(None) => trace!(pgn = msg.pgn, "Ignoring bus message"),
            Err(e) => warn!(pgn = msg.pgn, "Invalid control message: {}", e),
        }
    }
    debug!("Bus inbound stream ended");
}

struct DataModelInbound {
    translator: Translator,
    engine: EngineHandle,
    data_model: Arc<dyn DataModel>,
    source: String,
    registrations: Registrations,
    action_tx: mpsc::UnboundedSender<ChangeRequest>,
}

impl DataModelInbound {
    fn ensure_registered(&self, path: &str, source: &str) {
        let key = (path.to_string(), source.to_string());
        if self.registrations.lock().contains_key(&key) {
            return;
        }

        let handler = action_handler(self.translator.clone(), self.action_tx.clone());
        let handle = self.data_model.register_action_handler(path, source, handler);
        debug!(path, source, "Registered action handler");

        self.registrations.lock().insert(key, handle);
    }

    async fn handle_update(&self, update: DataModelUpdate) {
        if !SwitchPath::is_state_path(&update.path) {
            trace!(path = %update.path, "Ignoring non-state path");
            return;
        }

        self.ensure_registered(&update.path, &update.source);

        if update.source == self.source {
            trace!(path = %update.path, "Ignoring own update");
            return;
        }

        match self.translator.from_data_model(&update.path, &update.value) {
            Ok(request) => submit(&self.engine, request).await,
            Err(e) => warn!(path = %update.path, source = %update.source, "Invalid update: {}", e),
        }
    }
}

async fn run_data_model_inbound(
    inbound: DataModelInbound,
    mut rx: mpsc::UnboundedReceiver<DataModelUpdate>,
) {
    while let Some(update) = rx.recv().await {
        inbound.handle_update(update).await;
    }
    debug!("Data-model inbound stream ended");
}

/// Write-back handler: validate synchronously, apply asynchronously
fn action_handler(
    translator: Translator,
    action_tx: mpsc::UnboundedSender<ChangeRequest>,
) -> ActionHandler {
    Arc::new(move |path: &str, value: &Value| match translator.from_data_model(path, value) {
        Ok(request) => {
            if action_tx.send(request).is_err() {
                return ActionResult::Rejected("switch bank is shutting down".to_string());
            }
            ActionResult::Pending
        }
        Err(e) => {
            warn!(path, "Rejected write request: {}", e);
            ActionResult::Rejected(e.to_string())
        }
    })
}

async fn run_actions(mut rx: mpsc::UnboundedReceiver<ChangeRequest>, engine: EngineHandle) {
    while let Some(request) = rx.recv().await {
        submit(&engine, request).await;
    }
}

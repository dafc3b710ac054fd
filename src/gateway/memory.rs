//! In-process bus and data-model hub
//!
//! Used when no host transport is attached (standalone mode) and by the
//! gateway tests. Everything sent out is logged and the most recent
//! [`HISTORY_LIMIT`] items are kept for inspection; inbound traffic is
//! injected with [`MemoryBus::inject`], [`MemoryDataModel::set_value`] and
//! [`MemoryDataModel::put`].

use super::transport::{
    pattern_matches, ActionHandler, ActionResult, BusTransport, CancelHandle, DataModel,
    Subscription,
};
use crate::protocol::{BusMessage, DataModelUpdate, Delta};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Outbound items retained per hub
pub const HISTORY_LIMIT: usize = 64;

type Subscribers<T> = Mutex<Vec<(u64, mpsc::UnboundedSender<T>)>>;

fn record<T>(history: &Mutex<VecDeque<T>>, item: T) {
    let mut history = history.lock();
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(item);
}

#[derive(Default)]
struct BusInner {
    subscribers: Subscribers<BusMessage>,
    emitted: Mutex<VecDeque<BusMessage>>,
    next_id: AtomicU64,
}

/// In-memory bus
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound message to every subscriber
    pub fn inject(&self, msg: BusMessage) {
        let subscribers = self.inner.subscribers.lock();
        for (_, tx) in subscribers.iter() {
            let _ = tx.send(msg.clone());
        }
    }

    /// Most recent emitted messages, oldest first
    pub fn emitted(&self) -> Vec<BusMessage> {
        self.inner.emitted.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl BusTransport for MemoryBus {
    fn subscribe(&self) -> Subscription<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push((id, tx));

        let inner: Weak<BusInner> = Arc::downgrade(&self.inner);
        let handle = CancelHandle::new("bus inbound", move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().retain(|(i, _)| *i != id);
            }
        });

        Subscription { rx, handle }
    }

    fn emit(&self, msg: BusMessage) {
        match serde_json::to_string(&msg) {
            Ok(json) => debug!("bus out: {}", json),
            Err(_) => debug!("bus out: {:?}", msg),
        }
        record(&self.inner.emitted, msg);
    }
}

type HandlerKey = (String, String);

struct PatternSubscriber {
    id: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<DataModelUpdate>,
}

#[derive(Default)]
struct DataModelInner {
    subscribers: Mutex<Vec<PatternSubscriber>>,
    handlers: Mutex<BTreeMap<HandlerKey, (u64, ActionHandler)>>,
    published: Mutex<VecDeque<Delta>>,
    next_id: AtomicU64,
}

/// In-memory data model
///
/// Published deltas are echoed to matching subscribers, as a data-model
/// server would.
#[derive(Clone, Default)]
pub struct MemoryDataModel {
    inner: Arc<DataModelInner>,
}

impl MemoryDataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value written by some other source
    pub fn set_value(&self, path: &str, value: Value, source: &str) {
        self.deliver(DataModelUpdate {
            path: path.to_string(),
            value,
            source: source.to_string(),
        });
    }

    /// Write request against `path`, answered by the first registered handler
    ///
    /// Returns None when nobody handles the path.
    pub fn put(&self, path: &str, value: &Value) -> Option<ActionResult> {
        let handler = self
            .inner
            .handlers
            .lock()
            .iter()
            .find(|((p, _), _)| p == path)
            .map(|(_, (_, handler))| handler.clone())?;

        Some(handler(path, value))
    }

    /// Most recent published deltas, oldest first
    pub fn published(&self) -> Vec<Delta> {
        self.inner.published.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    fn deliver(&self, update: DataModelUpdate) {
        let subscribers = self.inner.subscribers.lock();
        for subscriber in subscribers
            .iter()
            .filter(|s| pattern_matches(&s.pattern, &update.path))
        {
            let _ = subscriber.tx.send(update.clone());
        }
    }
}

impl DataModel for MemoryDataModel {
    fn subscribe(&self, pattern: &str, period: Duration) -> Subscription<DataModelUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(pattern, ?period, "data-model subscribe");

        self.inner.subscribers.lock().push(PatternSubscriber {
            id,
            pattern: pattern.to_string(),
            tx,
        });

        let inner: Weak<DataModelInner> = Arc::downgrade(&self.inner);
        let handle = CancelHandle::new(format!("subscription {}", pattern), move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().retain(|s| s.id != id);
            }
        });

        Subscription { rx, handle }
    }

    fn register_action_handler(&self, path: &str, source: &str, handler: ActionHandler) -> CancelHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (path.to_string(), source.to_string());
        self.inner.handlers.lock().insert(key.clone(), (id, handler));

        let inner: Weak<DataModelInner> = Arc::downgrade(&self.inner);
        CancelHandle::new(format!("action handler {} ({})", path, source), move || {
            if let Some(inner) = inner.upgrade() {
                let mut handlers = inner.handlers.lock();
                // Only remove the registration this handle created
                if handlers.get(&key).map(|(i, _)| *i) == Some(id) {
                    handlers.remove(&key);
                }
            }
        })
    }

    fn publish(&self, delta: Delta) {
        match serde_json::to_string(&delta) {
            Ok(json) => debug!("data-model out: {}", json),
            Err(_) => debug!("data-model out: {:?}", delta),
        }

        for update in &delta.updates {
            for value in &update.values {
                self.deliver(DataModelUpdate {
                    path: value.path.clone(),
                    value: value.value.clone(),
                    source: update.source.clone(),
                });
            }
        }

        record(&self.inner.published, delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PathValue;
    use serde_json::json;

    #[tokio::test]
    async fn test_bus_inject_and_cancel() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let msg = BusMessage::new(127502, serde_json::Map::new());
        bus.inject(msg.clone());
        assert_eq!(sub.rx.recv().await, Some(msg));

        sub.handle.cancel();
        assert_eq!(bus.subscriber_count(), 0);
        // Sender is gone, so the stream ends
        assert_eq!(sub.rx.recv().await, None);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = MemoryBus::new();
        let dm = MemoryDataModel::new();

        for i in 0..(HISTORY_LIMIT as u32 * 3) {
            bus.emit(BusMessage::new(i, serde_json::Map::new()));
            dm.publish(Delta::new("me", Vec::new()));
        }

        let emitted = bus.emitted();
        assert_eq!(emitted.len(), HISTORY_LIMIT);
        assert_eq!(emitted.last().unwrap().pgn, HISTORY_LIMIT as u32 * 3 - 1);
        assert_eq!(emitted.first().unwrap().pgn, HISTORY_LIMIT as u32 * 2);
        assert_eq!(dm.published().len(), HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_publish_echoes_to_matching_subscribers() {
        let dm = MemoryDataModel::new();
        let mut ours = dm.subscribe("electrical.switches.bank.107.*", Duration::from_secs(1));
        let mut other = dm.subscribe("electrical.switches.bank.12.*", Duration::from_secs(1));

        dm.publish(Delta::new(
            "me",
            vec![PathValue {
                path: "electrical.switches.bank.107.1.state".to_string(),
                value: json!(1),
            }],
        ));

        let update = ours.rx.recv().await.unwrap();
        assert_eq!(update.source, "me");
        assert_eq!(update.value, json!(1));
        assert!(other.rx.try_recv().is_err());
        assert_eq!(dm.published().len(), 1);
    }

    #[test]
    fn test_put_uses_registered_handler() {
        let dm = MemoryDataModel::new();
        let path = "electrical.switches.bank.107.1.state";
        assert!(dm.put(path, &json!(1)).is_none());

        let handle = dm.register_action_handler(
            path,
            "src",
            Arc::new(|_: &str, value: &Value| {
                if value == &json!(1) {
                    ActionResult::Pending
                } else {
                    ActionResult::Rejected("no".to_string())
                }
            }),
        );
        assert_eq!(dm.put(path, &json!(1)), Some(ActionResult::Pending));
        assert_eq!(
            dm.put(path, &json!(5)),
            Some(ActionResult::Rejected("no".to_string()))
        );

        handle.cancel();
        assert_eq!(dm.handler_count(), 0);
    }
}

//! Transport interfaces the gateway talks to
//!
//! The host bus transport and the data-model server are external. They are
//! reached only through these traits; every subscription or registration
//! hands back a [`CancelHandle`] that undoes it.

use crate::protocol::{BusMessage, DataModelUpdate, Delta};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Token that undoes a subscription or registration
///
/// Cancelling is idempotent; dropping the handle cancels as well.
pub struct CancelHandle {
    label: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// What this handle undoes (for logs)
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("label", &self.label)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Stream of inbound items plus the handle that ends it
pub struct Subscription<T> {
    pub rx: mpsc::UnboundedReceiver<T>,
    pub handle: CancelHandle,
}

/// Answer of an action (write-back) handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Accepted; the new value will be published once applied
    Pending,
    /// Rejected with a reason
    Rejected(String),
}

/// Write-back handler: receives the target path and the requested value
pub type ActionHandler = Arc<dyn Fn(&str, &Value) -> ActionResult + Send + Sync>;

/// Host bus transport carrying decoded messages
pub trait BusTransport: Send + Sync {
    /// Start receiving inbound messages
    fn subscribe(&self) -> Subscription<BusMessage>;

    /// Send a message on the bus
    fn emit(&self, msg: BusMessage);
}

/// Path-addressed data model
pub trait DataModel: Send + Sync {
    /// Receive updates for every path matching `pattern` (`prefix.*` or exact)
    fn subscribe(&self, pattern: &str, period: Duration) -> Subscription<DataModelUpdate>;

    /// Handle write requests for `path` on behalf of `source`
    fn register_action_handler(&self, path: &str, source: &str, handler: ActionHandler) -> CancelHandle;

    /// Publish a delta
    fn publish(&self, delta: Delta);
}

/// True if `path` is covered by a subscription `pattern`
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

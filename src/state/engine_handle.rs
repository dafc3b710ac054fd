//! EngineHandle - Public API for the StateEngine
//!
//! Wraps the command channel with async request/response methods. Cloning
//! the handle is cheap; every clone talks to the same engine.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};

use super::commands::EngineCommand;
use super::types::{ApplyOutcome, ChangeRequest, ChannelView};
use crate::error::EngineError;

/// Handle for interacting with the StateEngine
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Apply a change request and wait for the outcome
    ///
    /// Returns [`EngineError::Closed`] once the engine has shut down.
    pub async fn apply(&self, request: ChangeRequest) -> Result<ApplyOutcome, EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::Apply {
            request,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Err(EngineError::Closed);
        }

        response_rx.await.unwrap_or(Err(EngineError::Closed))
    }

    /// Every enabled channel, ordered by index
    pub async fn channels(&self) -> Vec<ChannelView> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::ListChannels {
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    /// Channels that would be included in a broadcast right now
    pub async fn snapshot(&self) -> BTreeMap<u8, bool> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::Snapshot {
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return BTreeMap::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    /// Returns false once the engine has stopped
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Stop the engine and wait for the final state to be persisted
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCommand::Shutdown {
                response: response_tx,
            })
            .is_err()
        {
            return;
        }

        let _ = response_rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::ChangeOrigin;

    #[test]
    fn test_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<EngineHandle>();
    }

    #[tokio::test]
    async fn test_closed_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = EngineHandle::new(tx);

        assert!(!handle.is_alive());
        let request = ChangeRequest {
            instance: 107,
            channel: 1,
            on: true,
            origin: ChangeOrigin::Manual,
        };
        assert_eq!(handle.apply(request).await, Err(EngineError::Closed));
        assert!(handle.channels().await.is_empty());
        handle.shutdown().await;
    }
}

//! Commands for the state engine actor and the outbound sink it drives
//!
//! Every mutation of the switch bank is a command on one channel, so requests
//! from the bus, the data model and the HTTP endpoint are serialized by
//! construction.

use super::types::{ApplyOutcome, ChangeRequest, ChannelView};
use crate::error::EngineError;
use crate::protocol::{BusMessage, Delta};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

// ============================================================================
// Outbound
// ============================================================================

/// Where the engine sends its output
///
/// Implemented by the gateway on top of the bus transport and the data model.
/// Both calls must return promptly; they are made from the engine task.
pub trait SwitchSink: Send + Sync {
    /// Emit a status broadcast on the bus
    fn broadcast(&self, msg: BusMessage);

    /// Publish a delta to the data model
    fn publish(&self, delta: Delta);
}

// ============================================================================
// EngineCommand
// ============================================================================

/// Commands for the state engine
#[derive(Debug)]
pub enum EngineCommand {
    /// Apply a canonical change request
    Apply {
        request: ChangeRequest,
        response: oneshot::Sender<Result<ApplyOutcome, EngineError>>,
    },

    /// List every enabled channel
    ListChannels {
        response: oneshot::Sender<Vec<ChannelView>>,
    },

    /// TTL-filtered view of the bank, as it would be broadcast now
    Snapshot {
        response: oneshot::Sender<BTreeMap<u8, bool>>,
    },

    /// Stop the timer, persist the final state and exit
    Shutdown { response: oneshot::Sender<()> },
}

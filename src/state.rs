//! State management module - canonical switch bank state
//!
//! This module owns the switch bank: the channel store, the engine actor that
//! serializes every change and drives the periodic broadcast, and the
//! persistence of power-down state across restarts.

mod commands;
mod engine;
mod engine_handle;
pub mod persistence;
pub mod persistence_actor;
mod store;
mod types;

pub use commands::{EngineCommand, SwitchSink};
pub use engine::{EngineSettings, StateEngine};
pub use engine_handle::EngineHandle;
pub use persistence::SnapshotFile;
pub use persistence_actor::{PersistenceActor, PersistenceHandle, DEFAULT_DEBOUNCE_MS};
pub use store::ChannelStore;
pub use types::{
    is_valid_channel, ApplyOutcome, ChangeOrigin, ChangeRequest, Channel, ChannelConfig,
    ChannelView, PowerState, PowerUpPolicy, PowerValue, SwitchState, NUM_CHANNELS,
};

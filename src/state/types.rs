//! Switch state type definitions
//!
//! Defines the channel, policy and change-request types shared by the store,
//! the translator and the engine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Number of channels on the virtual switch bank
pub const NUM_CHANNELS: u8 = 28;

/// Returns true if `index` is a valid 1-based channel number
pub fn is_valid_channel(index: i64) -> bool {
    (1..=NUM_CHANNELS as i64).contains(&index)
}

/// Tri-state value of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    Off,
    On,
    /// No authoritative value yet
    Unknown,
}

impl SwitchState {
    pub fn from_bool(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }

    /// Some(true/false) for a known value, None for Unknown
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SwitchState::On => Some(true),
            SwitchState::Off => Some(false),
            SwitchState::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SwitchState::Unknown)
    }
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchState::Off => write!(f, "off"),
            SwitchState::On => write!(f, "on"),
            SwitchState::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a channel does when the service starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpPolicy {
    #[default]
    ForceOff,
    ForceOn,
    /// Restore the value persisted at the last shutdown / change
    RestorePrevious,
}

/// Resolved per-channel configuration (one per channel 1..=28)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub index: u8,
    pub label: String,
    pub enabled: bool,
    pub power_up: PowerUpPolicy,
    pub ttl_enabled: bool,
}

impl ChannelConfig {
    /// Default configuration for a channel: enabled, labelled by its number
    pub fn with_defaults(index: u8) -> Self {
        Self {
            index,
            label: index.to_string(),
            enabled: true,
            power_up: PowerUpPolicy::default(),
            ttl_enabled: true,
        }
    }
}

/// One channel as held by the [`ChannelStore`](super::store::ChannelStore)
#[derive(Debug, Clone)]
pub struct Channel {
    pub index: u8,
    pub label: String,
    pub state: SwitchState,
    pub last_updated: Instant,
    pub power_up: PowerUpPolicy,
    pub ttl_enabled: bool,
}

/// Persisted ON/OFF value of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerValue {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl PowerValue {
    pub fn from_bool(on: bool) -> Self {
        if on {
            PowerValue::On
        } else {
            PowerValue::Off
        }
    }

    pub fn as_state(&self) -> SwitchState {
        match self {
            PowerValue::On => SwitchState::On,
            PowerValue::Off => SwitchState::Off,
        }
    }
}

/// Power-down snapshot: channel index -> ON/OFF
pub type PowerState = BTreeMap<u8, PowerValue>;

/// Where a change request came from (logging only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOrigin {
    /// PGN 127502 switch bank control
    BankControl,
    /// PGN 126208 command for PGN 127501
    Command,
    /// Data-model subscription update or action handler
    DataModel,
    /// HTTP PUT /virtualSwitch
    Manual,
}

impl std::fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeOrigin::BankControl => write!(f, "bank-control"),
            ChangeOrigin::Command => write!(f, "command"),
            ChangeOrigin::DataModel => write!(f, "data-model"),
            ChangeOrigin::Manual => write!(f, "manual"),
        }
    }
}

/// Canonical (instance, channel, on/off) request, independent of the inbound shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRequest {
    pub instance: u8,
    /// 1-based channel index
    pub channel: u8,
    pub on: bool,
    pub origin: ChangeOrigin,
}

/// Result of applying an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stored value already matched; only the timestamp was refreshed
    Unchanged,
    /// Value changed and was rebroadcast
    Changed { previous: SwitchState },
}

/// Read-only view of a channel for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelView {
    pub index: u8,
    pub label: String,
    pub state: SwitchState,
    pub power_up: PowerUpPolicy,
    pub ttl_enabled: bool,
    /// Milliseconds since the last update
    pub age_ms: u64,
}

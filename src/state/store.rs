//! ChannelStore - In-memory switch bank state
//!
//! Holds exactly the enabled channels of the bank, keyed by their 1-based
//! index. The store is owned by the state engine and is never shared.

use super::types::{Channel, ChannelConfig, ChannelView, PowerState, PowerUpPolicy, PowerValue, SwitchState};
use crate::error::EngineError;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-channel state table
#[derive(Debug, Default)]
pub struct ChannelStore {
    channels: BTreeMap<u8, Channel>,
}

impl ChannelStore {
    /// Create an empty store (every lookup is NotFound until initialized)
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate every enabled channel according to its power-up policy
    ///
    /// `RestorePrevious` channels take their value from `prior`, defaulting
    /// to Off when the snapshot has no entry for them.
    pub fn initialize(&mut self, configs: &[ChannelConfig], prior: &PowerState, now: Instant) {
        self.channels.clear();

        for config in configs.iter().filter(|c| c.enabled) {
            let state = match config.power_up {
                PowerUpPolicy::ForceOn => SwitchState::On,
                PowerUpPolicy::ForceOff => SwitchState::Off,
                PowerUpPolicy::RestorePrevious => prior
                    .get(&config.index)
                    .map(PowerValue::as_state)
                    .unwrap_or(SwitchState::Off),
            };

            self.channels.insert(
                config.index,
                Channel {
                    index: config.index,
                    label: config.label.clone(),
                    state,
                    last_updated: now,
                    power_up: config.power_up,
                    ttl_enabled: config.ttl_enabled,
                },
            );
        }
    }

    pub fn get(&self, index: u8) -> Option<&Channel> {
        self.channels.get(&index)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Write a new value and return the previous one
    ///
    /// Also refreshes `last_updated`.
    pub fn set(&mut self, index: u8, state: SwitchState, now: Instant) -> Result<SwitchState, EngineError> {
        let channel = self
            .channels
            .get_mut(&index)
            .ok_or(EngineError::UnknownChannel(index))?;

        let previous = channel.state;
        channel.state = state;
        channel.last_updated = channel.last_updated.max(now);
        Ok(previous)
    }

    /// Refresh `last_updated` without touching the value
    pub fn touch(&mut self, index: u8, now: Instant) -> Result<(), EngineError> {
        let channel = self
            .channels
            .get_mut(&index)
            .ok_or(EngineError::UnknownChannel(index))?;

        channel.last_updated = channel.last_updated.max(now);
        Ok(())
    }

    /// TTL-filtered view of the bank for bus broadcasts
    ///
    /// Unknown channels are never included. A channel is dropped iff it has
    /// TTL enabled, `ttl_secs > 0` and it was last updated strictly more than
    /// `ttl_secs` ago.
    pub fn snapshot(&self, ttl_secs: u64, now: Instant) -> BTreeMap<u8, bool> {
        let ttl = Duration::from_secs(ttl_secs);

        self.channels
            .values()
            .filter(|c| {
                let expired = c.ttl_enabled
                    && ttl_secs > 0
                    && now.saturating_duration_since(c.last_updated) > ttl;
                !expired
            })
            .filter_map(|c| c.state.as_bool().map(|on| (c.index, on)))
            .collect()
    }

    /// Every enabled channel with a known value, TTL ignored
    pub fn values(&self) -> Vec<(&Channel, bool)> {
        self.channels
            .values()
            .filter_map(|c| c.state.as_bool().map(|on| (c, on)))
            .collect()
    }

    /// Known values of every channel, in the persisted representation
    pub fn power_state(&self) -> PowerState {
        self.channels
            .values()
            .filter_map(|c| c.state.as_bool().map(|on| (c.index, PowerValue::from_bool(on))))
            .collect()
    }

    /// Status view of every enabled channel
    pub fn views(&self, now: Instant) -> Vec<ChannelView> {
        self.channels
            .values()
            .map(|c| ChannelView {
                index: c.index,
                label: c.label.clone(),
                state: c.state,
                power_up: c.power_up,
                ttl_enabled: c.ttl_enabled,
                age_ms: now.saturating_duration_since(c.last_updated).as_millis() as u64,
            })
            .collect()
    }

    /// Drop all channels (shutdown)
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_configs() -> Vec<ChannelConfig> {
        (1..=super::super::types::NUM_CHANNELS)
            .map(ChannelConfig::with_defaults)
            .collect()
    }

    #[test]
    fn test_initialize_policies() {
        let mut configs = make_configs();
        configs[0].power_up = PowerUpPolicy::ForceOn;
        configs[1].power_up = PowerUpPolicy::RestorePrevious;
        configs[2].power_up = PowerUpPolicy::RestorePrevious;

        let mut prior = PowerState::new();
        prior.insert(2, PowerValue::On);

        let mut store = ChannelStore::new();
        store.initialize(&configs, &prior, Instant::now());

        assert_eq!(store.get(1).unwrap().state, SwitchState::On);
        assert_eq!(store.get(2).unwrap().state, SwitchState::On);
        // No persisted value: fail open to Off
        assert_eq!(store.get(3).unwrap().state, SwitchState::Off);
        assert_eq!(store.get(4).unwrap().state, SwitchState::Off);
    }

    #[test]
    fn test_initialize_never_leaves_unknown() {
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), Instant::now());

        assert_eq!(store.len(), 28);
        for index in 1..=28 {
            assert!(store.get(index).unwrap().state.is_known());
        }
    }

    #[test]
    fn test_disabled_channels_are_absent() {
        let mut configs = make_configs();
        configs[4].enabled = false;

        let mut store = ChannelStore::new();
        store.initialize(&configs, &PowerState::new(), Instant::now());

        assert_eq!(store.len(), 27);
        assert!(store.get(5).is_none());
        assert_eq!(
            store.set(5, SwitchState::On, Instant::now()),
            Err(EngineError::UnknownChannel(5))
        );
        assert!(!store.snapshot(0, Instant::now()).contains_key(&5));
    }

    #[test]
    fn test_set_returns_previous() {
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), Instant::now());

        let previous = store.set(3, SwitchState::On, Instant::now()).unwrap();
        assert_eq!(previous, SwitchState::Off);
        assert_eq!(store.get(3).unwrap().state, SwitchState::On);
    }

    #[test]
    fn test_unknown_is_never_in_snapshot() {
        let now = Instant::now();
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), now);
        store.set(7, SwitchState::Unknown, now).unwrap();

        assert!(!store.snapshot(0, now).contains_key(&7));
        assert!(store.values().iter().all(|(c, _)| c.index != 7));
        assert!(!store.power_state().contains_key(&7));
        assert_eq!(store.snapshot(0, now).len(), super::super::types::NUM_CHANNELS as usize - 1);
    }

    #[test]
    fn test_touch_refreshes_timestamp() {
        let start = Instant::now();
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), start);

        let later = start + Duration::from_secs(30);
        store.touch(3, later).unwrap();
        assert_eq!(store.get(3).unwrap().last_updated, later);
        assert_eq!(store.get(3).unwrap().state, SwitchState::Off);

        // Never moves backwards
        store.touch(3, start).unwrap();
        assert_eq!(store.get(3).unwrap().last_updated, later);
    }

    #[test]
    fn test_ttl_expiry() {
        let start = Instant::now();
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), start);
        store.touch(1, start + Duration::from_secs(50)).unwrap();

        let snapshot = store.snapshot(60, start + Duration::from_secs(61));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&1), Some(&false));
    }

    #[test]
    fn test_ttl_zero_disables_expiry() {
        let start = Instant::now();
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), start);

        let snapshot = store.snapshot(0, start + Duration::from_secs(86_400));
        assert_eq!(snapshot.len(), 28);
    }

    #[test]
    fn test_ttl_disabled_channel_never_expires() {
        let start = Instant::now();
        let mut configs = make_configs();
        configs[9].ttl_enabled = false;

        let mut store = ChannelStore::new();
        store.initialize(&configs, &PowerState::new(), start);

        let snapshot = store.snapshot(60, start + Duration::from_secs(3_600));
        assert_eq!(snapshot.keys().copied().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_power_state_covers_known_channels() {
        let mut store = ChannelStore::new();
        store.initialize(&make_configs(), &PowerState::new(), Instant::now());
        store.set(8, SwitchState::On, Instant::now()).unwrap();

        let power = store.power_state();
        assert_eq!(power.len(), 28);
        assert_eq!(power.get(&8), Some(&PowerValue::On));
        assert_eq!(power.get(&9), Some(&PowerValue::Off));
    }

    proptest! {
        #[test]
        fn prop_ttl_boundary(ttl_secs in 1u64..3_600, epsilon_ms in 1u64..1_000) {
            let start = Instant::now();
            let mut store = ChannelStore::new();
            store.initialize(&[ChannelConfig::with_defaults(1)], &PowerState::new(), start);

            let ttl = Duration::from_secs(ttl_secs);
            let epsilon = Duration::from_millis(epsilon_ms);

            prop_assert!(store.snapshot(ttl_secs, start + ttl - epsilon).contains_key(&1));
            prop_assert!(store.snapshot(ttl_secs, start + ttl).contains_key(&1));
            prop_assert!(!store.snapshot(ttl_secs, start + ttl + epsilon).contains_key(&1));
        }
    }
}

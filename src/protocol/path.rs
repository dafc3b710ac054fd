//! Typed data-model paths
//!
//! Every channel lives at `electrical.switches.bank.<instance>.<key>.state`,
//! where `<key>` is the channel label (which defaults to the channel number).

use crate::error::ValidationError;

/// Fixed prefix of every switch bank path
pub const BANK_PATH_PREFIX: &str = "electrical.switches.bank";
/// Suffix of the paths that carry a channel value
pub const STATE_SUFFIX: &str = "state";

/// Subscription pattern covering every path of `instance`
pub fn bank_pattern(instance: u8) -> String {
    format!("{}.{}.*", BANK_PATH_PREFIX, instance)
}

/// `electrical.switches.bank.<instance>.<key>.state`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPath {
    pub instance: u8,
    /// Label or channel number segment
    pub key: String,
}

impl SwitchPath {
    pub fn new(instance: u8, key: impl Into<String>) -> Self {
        Self {
            instance,
            key: key.into(),
        }
    }

    /// Parse a full state path
    ///
    /// Rejects anything that is not exactly prefix, instance, one key segment
    /// and the state suffix.
    pub fn parse(path: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidPath(path.to_string());

        let rest = path
            .strip_prefix(BANK_PATH_PREFIX)
            .and_then(|r| r.strip_prefix('.'))
            .ok_or_else(invalid)?;

        let mut segments = rest.split('.');
        let (Some(instance), Some(key), Some(suffix), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };

        if suffix != STATE_SUFFIX || key.is_empty() {
            return Err(invalid());
        }

        let instance = instance.parse::<u8>().map_err(|_| invalid())?;

        Ok(Self::new(instance, key))
    }

    /// True if `path` ends in the state suffix
    pub fn is_state_path(path: &str) -> bool {
        path.rsplit('.').next() == Some(STATE_SUFFIX)
    }
}

impl std::fmt::Display for SwitchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            BANK_PATH_PREFIX, self.instance, self.key, STATE_SUFFIX
        )
    }
}

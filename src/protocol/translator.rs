//! Translation between inbound message shapes and canonical change requests
//!
//! Inbound shapes:
//! - PGN 127502 Switch Bank Control: `Switch Bank Instance` plus exactly one
//!   `Switch<N>` field (N is the 1-based channel)
//! - PGN 126208 Command for PGN 127501: `list[0].Value` is the instance and
//!   `list[1]` carries `{Parameter, Value}`
//! - data-model writes at `electrical.switches.bank.<instance>.<key>.state`
//! - manual HTTP requests shaped like PGN 127502
//!
//! Outbound, the canonical state becomes a PGN 127501 status broadcast and
//! data-model deltas.

use super::messages::*;
use super::path::SwitchPath;
use crate::error::ValidationError;
use crate::state::{is_valid_channel, ChangeOrigin, ChangeRequest, ChannelConfig};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Channel label table used to resolve data-model keys
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: Vec<(u8, String)>,
}

impl LabelTable {
    pub fn from_configs(configs: &[ChannelConfig]) -> Self {
        Self {
            labels: configs.iter().map(|c| (c.index, c.label.clone())).collect(),
        }
    }

    /// Resolve a path key to a channel index
    ///
    /// An exact label match wins; a label shared by several channels is
    /// ambiguous. Otherwise the key is read as a channel number.
    pub fn resolve(&self, key: &str) -> Result<u8, ValidationError> {
        let mut matches = self.labels.iter().filter(|(_, label)| label == key);

        match (matches.next(), matches.next()) {
            (Some((index, _)), None) => return Ok(*index),
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousLabel(key.to_string())),
            _ => {}
        }

        match key.parse::<i64>() {
            Ok(index) if is_valid_channel(index) => Ok(index as u8),
            Ok(index) => Err(ValidationError::ChannelOutOfRange(index)),
            Err(_) => Err(ValidationError::UnknownLabel(key.to_string())),
        }
    }

    /// Path key of channel `index` (its label, or its number when unlabelled)
    pub fn key_for(&self, index: u8) -> String {
        self.labels
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| index.to_string())
    }
}

/// Maps inbound messages to [`ChangeRequest`]s for one virtual instance
#[derive(Debug, Clone)]
pub struct Translator {
    instance: u8,
    labels: LabelTable,
}

impl Translator {
    pub fn new(instance: u8, labels: LabelTable) -> Self {
        Self { instance, labels }
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    /// Translate a decoded bus message
    ///
    /// Returns `Ok(None)` for messages that are not a control request for
    /// this instance, and an error for control requests that are malformed.
    pub fn from_bus(&self, msg: &BusMessage) -> Result<Option<ChangeRequest>, ValidationError> {
        match msg.pgn {
            PGN_SWITCH_BANK_CONTROL => self.from_bank_control(&msg.fields),
            PGN_COMMAND_GROUP_FUNCTION => self.from_command(&msg.fields),
            _ => Ok(None),
        }
    }

    fn from_bank_control(
        &self,
        fields: &Map<String, Value>,
    ) -> Result<Option<ChangeRequest>, ValidationError> {
        let instance = fields
            .get(FIELD_SWITCH_BANK_INSTANCE)
            .ok_or(ValidationError::MissingField(FIELD_SWITCH_BANK_INSTANCE))?;
        if as_integer(instance) != Some(self.instance as i64) {
            return Ok(None);
        }

        let (channel, value) = single_channel_field(fields)?;

        Ok(Some(ChangeRequest {
            instance: self.instance,
            channel,
            on: normalize_bus_value(value),
            origin: ChangeOrigin::BankControl,
        }))
    }

    /// PGN 126208 Command targeting PGN 127501
    ///
    /// The wire `Parameter` is the field number inside PGN 127501, where
    /// field 1 is the instance and field N+1 is indicator N. The channel is
    /// therefore `Parameter - 1`, used directly as the 1-based index.
    fn from_command(
        &self,
        fields: &Map<String, Value>,
    ) -> Result<Option<ChangeRequest>, ValidationError> {
        if fields.get(FIELD_FUNCTION_CODE).and_then(Value::as_str) != Some(FUNCTION_CODE_COMMAND) {
            return Ok(None);
        }
        if fields.get(FIELD_PGN).and_then(as_integer) != Some(PGN_BINARY_SWITCH_STATUS as i64) {
            return Ok(None);
        }

        let list = fields
            .get(FIELD_LIST)
            .and_then(Value::as_array)
            .ok_or(ValidationError::MissingField(FIELD_LIST))?;

        let instance = list
            .first()
            .and_then(|p| p.get(FIELD_VALUE))
            .ok_or(ValidationError::MissingField(FIELD_VALUE))?;
        if as_integer(instance) != Some(self.instance as i64) {
            return Ok(None);
        }

        let pair = list.get(1).ok_or(ValidationError::MissingField(FIELD_PARAMETER))?;
        let parameter = pair
            .get(FIELD_PARAMETER)
            .ok_or(ValidationError::MissingField(FIELD_PARAMETER))?;
        let parameter = as_integer(parameter).ok_or_else(|| ValidationError::InvalidField {
            field: FIELD_PARAMETER,
            value: parameter.to_string(),
        })?;
        let value = pair
            .get(FIELD_VALUE)
            .ok_or(ValidationError::MissingField(FIELD_VALUE))?;

        let channel = parameter.saturating_sub(1);
        if !is_valid_channel(channel) {
            return Err(ValidationError::ChannelOutOfRange(channel));
        }

        Ok(Some(ChangeRequest {
            instance: self.instance,
            channel: channel as u8,
            on: normalize_bus_value(value),
            origin: ChangeOrigin::Command,
        }))
    }

    /// Translate a data-model write at a `.state` path
    pub fn from_data_model(&self, path: &str, value: &Value) -> Result<ChangeRequest, ValidationError> {
        let path = SwitchPath::parse(path)?;
        if path.instance != self.instance {
            return Err(ValidationError::InstanceMismatch {
                expected: self.instance,
                actual: path.instance as i64,
            });
        }

        let channel = self.labels.resolve(&path.key)?;
        let on = coerce_bool(value)?;

        Ok(ChangeRequest {
            instance: self.instance,
            channel,
            on,
            origin: ChangeOrigin::DataModel,
        })
    }

    /// Validate a manual control request body (PGN 127502 shape)
    ///
    /// Checks, in order: body present, PGN, instance, exactly one channel
    /// field in range, boolean-coercible value.
    pub fn from_manual(&self, body: Option<&Value>) -> Result<ChangeRequest, ValidationError> {
        let body = body
            .and_then(Value::as_object)
            .ok_or(ValidationError::MissingBody)?;

        let pgn = body.get("pgn").ok_or(ValidationError::MissingField("pgn"))?;
        match as_integer(pgn) {
            Some(pgn) if pgn == PGN_SWITCH_BANK_CONTROL as i64 => {}
            Some(pgn) => {
                return Err(ValidationError::UnexpectedPgn {
                    expected: PGN_SWITCH_BANK_CONTROL,
                    actual: pgn,
                })
            }
            None => {
                return Err(ValidationError::InvalidField {
                    field: "pgn",
                    value: pgn.to_string(),
                })
            }
        }

        let fields = body
            .get("fields")
            .and_then(Value::as_object)
            .ok_or(ValidationError::MissingField("fields"))?;

        let instance = fields
            .get(FIELD_SWITCH_BANK_INSTANCE)
            .ok_or(ValidationError::MissingField(FIELD_SWITCH_BANK_INSTANCE))?;
        let instance = as_integer(instance).ok_or_else(|| ValidationError::InvalidField {
            field: FIELD_SWITCH_BANK_INSTANCE,
            value: instance.to_string(),
        })?;
        if instance != self.instance as i64 {
            return Err(ValidationError::InstanceMismatch {
                expected: self.instance,
                actual: instance,
            });
        }

        let (channel, value) = single_channel_field(fields)?;
        let on = coerce_bool(value)?;

        Ok(ChangeRequest {
            instance: self.instance,
            channel,
            on,
            origin: ChangeOrigin::Manual,
        })
    }

    /// Data-model delta for a set of `(channel, on)` values
    pub fn to_delta<I>(&self, source: &str, values: I) -> Delta
    where
        I: IntoIterator<Item = (u8, bool)>,
    {
        let values = values
            .into_iter()
            .map(|(index, on)| PathValue {
                path: SwitchPath::new(self.instance, self.labels.key_for(index)).to_string(),
                value: Value::from(u8::from(on)),
            })
            .collect();
        Delta::new(source, values)
    }
}

/// Build the PGN 127501 status broadcast for `snapshot`
///
/// Returns None when no channel is present: an empty status is never sent.
pub fn to_broadcast(instance: u8, snapshot: &BTreeMap<u8, bool>) -> Option<BusMessage> {
    if snapshot.is_empty() {
        return None;
    }

    let mut fields = Map::new();
    fields.insert(FIELD_INSTANCE.to_string(), Value::from(instance));
    for (index, on) in snapshot {
        let value = if *on { "On" } else { "Off" };
        fields.insert(indicator_field(*index), Value::from(value));
    }

    Some(BusMessage {
        pgn: PGN_BINARY_SWITCH_STATUS,
        src: None,
        dst: Some(BROADCAST_ADDRESS),
        fields,
    })
}

/// Find the single `Switch<N>` field of a PGN 127502 field set
fn single_channel_field(fields: &Map<String, Value>) -> Result<(u8, &Value), ValidationError> {
    let mut found = fields.iter().filter_map(|(key, value)| {
        let digits = key.strip_prefix(SWITCH_FIELD_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((key.as_str(), digits, value))
    });

    let (key, digits, value) = found.next().ok_or(ValidationError::NoChannelField)?;
    let others: Vec<&str> = found.map(|(key, _, _)| key).collect();
    if !others.is_empty() {
        return Err(ValidationError::MultipleChannelFields(format!(
            "{}, {}",
            key,
            others.join(", ")
        )));
    }

    let index = digits.parse::<i64>().unwrap_or(i64::MAX);
    if !is_valid_channel(index) {
        return Err(ValidationError::ChannelOutOfRange(index));
    }

    Ok((index as u8, value))
}

/// Integer view of a JSON number or numeric string
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Bus value normalization: exactly "On" or 1 mean on, anything else off
pub fn normalize_bus_value(value: &Value) -> bool {
    match value {
        Value::String(s) => s == "On",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Strict on/off coercion for data-model and manual requests
pub fn coerce_bool(value: &Value) -> Result<bool, ValidationError> {
    let invalid = || ValidationError::InvalidValue(value.to_string());
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(invalid()),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

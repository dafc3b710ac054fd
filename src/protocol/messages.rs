//! Decoded bus messages and data-model deltas
//!
//! Frames arrive already decoded by the host transport as
//! `{"pgn": ..., "fields": {...}}` objects; nothing here touches raw CAN data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Binary Switch Bank Status (outbound broadcast)
pub const PGN_BINARY_SWITCH_STATUS: u32 = 127501;
/// Switch Bank Control (inbound shape A)
pub const PGN_SWITCH_BANK_CONTROL: u32 = 127502;
/// NMEA Command Group Function (inbound shape B)
pub const PGN_COMMAND_GROUP_FUNCTION: u32 = 126208;

/// Global broadcast destination address
pub const BROADCAST_ADDRESS: u8 = 255;

pub const FIELD_SWITCH_BANK_INSTANCE: &str = "Switch Bank Instance";
pub const FIELD_INSTANCE: &str = "Instance";
pub const FIELD_FUNCTION_CODE: &str = "Function Code";
pub const FIELD_PGN: &str = "PGN";
pub const FIELD_LIST: &str = "list";
pub const FIELD_PARAMETER: &str = "Parameter";
pub const FIELD_VALUE: &str = "Value";
pub const FUNCTION_CODE_COMMAND: &str = "Command";

/// Prefix of the per-channel fields in PGN 127502
pub const SWITCH_FIELD_PREFIX: &str = "Switch";
/// Prefix of the per-channel fields in PGN 127501
pub const INDICATOR_FIELD_PREFIX: &str = "Indicator";

/// A decoded bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub pgn: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<u8>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl BusMessage {
    pub fn new(pgn: u32, fields: Map<String, Value>) -> Self {
        Self {
            pgn,
            src: None,
            dst: None,
            fields,
        }
    }
}

/// Name of the field carrying channel `index` in PGN 127502
pub fn switch_field(index: u8) -> String {
    format!("{}{}", SWITCH_FIELD_PREFIX, index)
}

/// Name of the field carrying channel `index` in PGN 127501
pub fn indicator_field(index: u8) -> String {
    format!("{}{}", INDICATOR_FIELD_PREFIX, index)
}

/// One value in a data-model delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

/// A batch of values published together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaUpdate {
    /// Label of the publishing source
    #[serde(rename = "$source")]
    pub source: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub values: Vec<PathValue>,
}

/// Data-model delta message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub updates: Vec<DeltaUpdate>,
}

impl Delta {
    /// A single-update delta stamped with the current time
    pub fn new(source: &str, values: Vec<PathValue>) -> Self {
        Self {
            updates: vec![DeltaUpdate {
                source: source.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                values,
            }],
        }
    }

    /// All path/value pairs across every update
    pub fn values(&self) -> impl Iterator<Item = &PathValue> {
        self.updates.iter().flat_map(|u| u.values.iter())
    }
}

/// A value seen on the data-model subscription
#[derive(Debug, Clone, PartialEq)]
pub struct DataModelUpdate {
    pub path: String,
    pub value: Value,
    /// Label of the source that produced the value
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bus_message_deserialize_without_addresses() {
        let msg: BusMessage = serde_json::from_value(json!({
            "pgn": 127502,
            "fields": {"Switch Bank Instance": 107, "Switch3": "On"}
        }))
        .unwrap();

        assert_eq!(msg.pgn, PGN_SWITCH_BANK_CONTROL);
        assert_eq!(msg.dst, None);
        assert_eq!(msg.fields["Switch3"], json!("On"));
    }

    #[test]
    fn test_delta_serializes_source_key() {
        let delta = Delta::new(
            "n2k-virtual-switch",
            vec![PathValue {
                path: "electrical.switches.bank.107.3.state".to_string(),
                value: json!(1),
            }],
        );

        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(value["updates"][0]["$source"], json!("n2k-virtual-switch"));
        assert_eq!(value["updates"][0]["values"][0]["value"], json!(1));
        assert_eq!(delta.values().count(), 1);
    }

    #[test]
    fn test_field_names() {
        assert_eq!(switch_field(3), "Switch3");
        assert_eq!(indicator_field(28), "Indicator28");
    }
}

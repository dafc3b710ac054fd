//! Bus and data-model protocol layer
//!
//! Decoded message types, typed data-model paths, and the translator that
//! maps both to canonical change requests and back.

pub mod messages;
pub mod path;
pub mod translator;

pub use messages::{BusMessage, DataModelUpdate, Delta, DeltaUpdate, PathValue};
pub use path::{bank_pattern, SwitchPath};
pub use translator::{to_broadcast, LabelTable, Translator};

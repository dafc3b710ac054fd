//! N2K Virtual Switch
//!
//! Emulates a 28-channel NMEA 2000 binary switch bank: accepts bank control
//! messages from the bus, write requests from the data model and manual HTTP
//! commands, keeps the canonical state, and broadcasts bank status.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod paths;
pub mod protocol;
pub mod state;

//! Power-down state persistence to a JSON file
//!
//! The file maps channel numbers to "ON"/"OFF" and is pretty-printed:
//!
//! ```json
//! {
//!   "3": "ON",
//!   "4": "OFF"
//! }
//! ```
//!
//! A missing or unreadable file is never fatal; it means "no prior state".

use super::types::PowerState;
use crate::error::PersistenceError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File name of the snapshot inside the data directory
pub const SNAPSHOT_FILE_NAME: &str = "powerdown-state.json";

/// Location of the power-down snapshot on disk
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file inside `data_dir`
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(SNAPSHOT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, treating any failure as "no prior state"
    pub async fn load(&self) -> PowerState {
        match self.try_load().await {
            Ok(state) => {
                debug!(
                    "Power-down state loaded from {} ({} channels)",
                    self.path.display(),
                    state.len()
                );
                state
            }
            Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No power-down state at {}", self.path.display());
                PowerState::new()
            }
            Err(e) => {
                warn!(
                    "Ignoring power-down state at {}: {}",
                    self.path.display(),
                    e
                );
                PowerState::new()
            }
        }
    }

    async fn try_load(&self) -> Result<PowerState, PersistenceError> {
        let json = fs::read_to_string(&self.path).await?;
        let state = serde_json::from_str(&json)?;
        Ok(state)
    }

    /// Overwrite the snapshot with `state`
    ///
    /// Creates the parent directory on first use.
    pub async fn save(&self, state: &PowerState) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        fs::write(&self.path, json).await?;
        Ok(())
    }
}

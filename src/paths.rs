//! Application path resolution
//!
//! - **Dev mode** (debug builds): `config.yaml` in the working directory wins,
//!   and state and logs are kept next to it.
//! - **Portable mode**: a `.portable` marker next to the executable keeps
//!   everything in that directory.
//! - **Installed mode** (default): the platform data directory
//!   (`~/.local/share/N2K Virtual Switch` on Linux).
//!
//! The config file location and the data directory can both be overridden
//! from the command line or the config file.

use crate::state::persistence::SNAPSHOT_FILE_NAME;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "N2K Virtual Switch";

/// Application paths for config, persisted state, and logs
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Directory holding the power-down snapshot
    pub data_dir: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether everything lives in one local directory
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml in {})", cwd.display());
                return Self::local(&cwd);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::local(&exe_dir);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data directory, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        Self {
            config: app_data.join("config.yaml"),
            data_dir: app_data.join("state"),
            logs_dir: app_data.join("logs"),
            is_portable: false,
        }
    }

    /// Everything under one directory
    pub fn local(base: &Path) -> Self {
        Self {
            config: base.join("config.yaml"),
            data_dir: base.join(".state"),
            logs_dir: base.join("logs"),
            is_portable: true,
        }
    }

    /// Apply command-line or config-file overrides
    pub fn with_overrides(mut self, config: Option<PathBuf>, data_dir: Option<PathBuf>) -> Self {
        if let Some(config) = config {
            self.config = config;
        }
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        self
    }

    /// Location of the power-down snapshot
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Create the data and logs directories if needed
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.data_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

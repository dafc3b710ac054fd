//! Configuration management for the virtual switch
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Every key is optional; a missing file means the defaults.

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::api::DEFAULT_API_PORT;
use crate::state::{ChannelConfig, PowerUpPolicy, NUM_CHANNELS};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct AppConfig {
    /// Instance number of the emulated switch bank
    #[serde(default = "default_virtual_instance")]
    pub virtual_instance: u8,
    /// Seconds between status broadcasts
    #[serde(default = "default_send_rate_secs")]
    pub send_rate_secs: f64,
    /// Seconds after which an unrefreshed channel drops out of broadcasts (0 = never)
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
    /// Directory holding the power-down snapshot (defaults to the app data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Source label stamped on published data-model values
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Per-channel overrides; channels not listed use the defaults
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

/// Manual control HTTP endpoint
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Power-down snapshot writing
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct PersistenceConfig {
    /// Coalesce saves within this window (0 = write every save)
    #[serde(default)]
    pub debounce_ms: u64,
}

/// One entry of the `channels` list
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ChannelEntry {
    /// Channel number, 1-28
    pub index: u8,
    /// Name used in data-model paths instead of the number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub power_up: PowerUpPolicy,
    /// Whether the broadcast TTL applies to this channel
    #[serde(default = "default_true")]
    pub ttl_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            virtual_instance: default_virtual_instance(),
            send_rate_secs: default_send_rate_secs(),
            state_ttl_secs: default_state_ttl_secs(),
            data_dir: None,
            source: default_source(),
            api: ApiConfig::default(),
            persistence: PersistenceConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, the defaults otherwise
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults config
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if !(self.send_rate_secs.is_finite() && self.send_rate_secs > 0.0) {
            anyhow::bail!("send_rate_secs must be greater than 0 (got {})", self.send_rate_secs);
        }

        if self.source.trim().is_empty() {
            anyhow::bail!("source cannot be empty");
        }

        let mut seen = HashSet::new();
        for entry in &self.channels {
            if entry.index == 0 || entry.index > NUM_CHANNELS {
                anyhow::bail!(
                    "Channel index {} is out of range (must be 1-{})",
                    entry.index,
                    NUM_CHANNELS
                );
            }
            if !seen.insert(entry.index) {
                anyhow::bail!("Channel {} is configured more than once", entry.index);
            }
            if let Some(label) = &entry.label {
                validate_label(entry.index, label)?;
            }
        }

        let mut labels = HashSet::new();
        for config in self.channel_configs() {
            if config.enabled && !labels.insert(config.label.clone()) {
                warn!(
                    "Label '{}' is used by more than one channel; data-model writes to it will be rejected",
                    config.label
                );
            }
        }

        debug!("Configuration validated");
        Ok(())
    }

    /// Broadcast period
    pub fn send_rate(&self) -> Duration {
        Duration::from_secs_f64(self.send_rate_secs)
    }

    /// Resolved configuration of all channels, in index order
    pub fn channel_configs(&self) -> Vec<ChannelConfig> {
        (1..=NUM_CHANNELS)
            .map(|index| match self.channels.iter().find(|c| c.index == index) {
                Some(entry) => ChannelConfig {
                    index,
                    label: entry.label.clone().unwrap_or_else(|| index.to_string()),
                    enabled: entry.enabled,
                    power_up: entry.power_up,
                    ttl_enabled: entry.ttl_enabled,
                },
                None => ChannelConfig::with_defaults(index),
            })
            .collect()
    }

    /// JSON schema of the configuration file
    pub fn schema() -> Result<String> {
        let schema = schemars::schema_for!(AppConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}

fn validate_label(index: u8, label: &str) -> Result<()> {
    if label.is_empty() {
        anyhow::bail!("Channel {} label cannot be empty", index);
    }
    if label.contains('.') || label.chars().any(char::is_whitespace) {
        anyhow::bail!(
            "Channel {} label '{}' must not contain '.' or whitespace",
            index,
            label
        );
    }
    Ok(())
}

fn default_virtual_instance() -> u8 { 107 }
fn default_send_rate_secs() -> f64 { 15.0 }
fn default_state_ttl_secs() -> u64 { 60 }
fn default_source() -> String { crate::gateway::DEFAULT_SOURCE.to_string() }
fn default_api_port() -> u16 { DEFAULT_API_PORT }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.virtual_instance, 107);
        assert_eq!(config.send_rate(), Duration::from_secs(15));
        assert_eq!(config.state_ttl_secs, 60);
        assert!(config.api.enabled);
        assert_eq!(config.persistence.debounce_ms, 0);

        let channels = config.channel_configs();
        assert_eq!(channels.len(), NUM_CHANNELS as usize);
        assert_eq!(channels[0], ChannelConfig::with_defaults(1));
    }

    #[test]
    fn test_channel_overrides() {
        let yaml = r#"
virtual_instance: 12
send_rate_secs: 2.5
channels:
  - index: 3
    label: bilge
    power_up: restore_previous
    ttl_enabled: false
  - index: 28
    enabled: false
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.virtual_instance, 12);
        assert_eq!(config.send_rate(), Duration::from_millis(2500));

        let channels = config.channel_configs();
        assert_eq!(channels[2].label, "bilge");
        assert_eq!(channels[2].power_up, PowerUpPolicy::RestorePrevious);
        assert!(!channels[2].ttl_enabled);
        assert!(!channels[27].enabled);
        assert_eq!(channels[27].label, "28");
    }

    #[test]
    fn test_validation_errors() {
        assert!(AppConfig::parse("send_rate_secs: 0").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 0").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 29").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 2\n  - index: 2").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 2\n    label: \"\"").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 2\n    label: a.b").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 2\n    label: \"a b\"").is_err());
        assert!(AppConfig::parse("channels:\n  - index: 2\n    power_up: sometimes").is_err());
    }

    #[test]
    fn test_duplicate_labels_allowed() {
        let yaml = "channels:\n  - index: 1\n    label: pump\n  - index: 2\n    label: pump\n";
        assert!(AppConfig::parse(yaml).is_ok());
    }

    #[tokio::test]
    async fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.virtual_instance, 107);

        std::fs::write(&path, "virtual_instance: 5\n").unwrap();
        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.virtual_instance, 5);

        std::fs::write(&path, "virtual_instance: [").unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_schema_lists_keys() {
        let schema = AppConfig::schema().unwrap();
        assert!(schema.contains("virtual_instance"));
        assert!(schema.contains("restore_previous"));
    }
}

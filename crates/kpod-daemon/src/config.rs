//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use kpod_hid::{DriverConfig, KPOD_PID, KPOD_VID};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Polling settings
    #[serde(default)]
    pub driver: PollConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Print events to stdout as JSON lines
    #[serde(default)]
    pub json_events: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), json_events: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB Vendor ID, hex
    #[serde(default = "default_vid")]
    pub vendor_id: String,
    /// USB Product ID, hex
    #[serde(default = "default_pid")]
    pub product_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { vendor_id: default_vid(), product_id: default_pid() }
    }
}

fn default_vid() -> String {
    format!("{KPOD_VID:04x}")
}

fn default_pid() -> String {
    format!("{KPOD_PID:04x}")
}

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Read timeout in milliseconds; unset blocks until the device answers
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { poll_interval_ms: default_poll_interval_ms(), read_timeout_ms: None }
    }
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Config {
    /// Build the driver settings.
    pub fn driver_config(&self) -> Result<DriverConfig> {
        Ok(DriverConfig {
            vendor_id: parse_usb_id(&self.device.vendor_id).context("Invalid device.vendor_id")?,
            product_id: parse_usb_id(&self.device.product_id)
                .context("Invalid device.product_id")?,
            poll_interval: Duration::from_millis(self.driver.poll_interval_ms),
            read_timeout: self.driver.read_timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Parse a USB id written as hex, with or without a `0x` prefix.
fn parse_usb_id(value: &str) -> Result<u16> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).with_context(|| format!("not a 16-bit hex id: {value:?}"))
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    let config_path = config_path()?;

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("com", "kpod", "KPod").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

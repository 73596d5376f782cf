/*!
Configuration management for the thermodisplay application.
*/

use serde::{Deserialize, Serialize};
use std::path::Path;
use anyhow::{bail, Context, Result};

use shared::{BackoffSettings, DriverSettings};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "thermodisplay.toml";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seconds between two renders
    pub interval_secs: u64,

    /// Granularity of the interruptible wait in milliseconds
    pub wait_step_ms: u64,

    pub display: DisplayConfig,
    pub local: LocalConfig,
    pub mqtt: MqttConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            interval_secs: 60,
            wait_step_ms: 100,
            display: DisplayConfig::default(),
            local: LocalConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the named file, or the default file if it exists, or defaults
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load_from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::new()),
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Reject values the application cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("interval_secs must be greater than 0");
        }
        if self.wait_step_ms == 0 {
            bail!("wait_step_ms must be greater than 0");
        }
        self.display.driver.validate().context("Invalid [display] settings")?;
        if self.display.dio_pin == self.display.clk_pin {
            bail!("display.dio_pin and display.clk_pin must differ (both {})", self.display.dio_pin);
        }
        if self.local.timeout_secs == 0 {
            bail!("local.timeout_secs must be greater than 0");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must be 1..=65535");
        }
        if self.mqtt.topic.is_empty() {
            bail!("mqtt.topic must not be empty");
        }
        if self.mqtt.keep_alive_secs < 5 {
            bail!("mqtt.keep_alive_secs must be at least 5");
        }
        self.mqtt.backoff.validate().context("Invalid [mqtt] settings")?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which kind of GPIO access drives the two lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux GPIO character device
    Cdev,
    /// Raspberry Pi register access
    Rppal,
    /// Emulated module, nothing is wired
    Simulated,
}

/// Display wiring and signaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: Backend,

    /// GPIO character device (cdev backend only)
    pub chip: String,

    /// GPIO line offset wired to DIO
    pub dio_pin: u32,

    /// GPIO line offset wired to CLK
    pub clk_pin: u32,

    #[serde(flatten)]
    pub driver: DriverSettings,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Cdev,
            chip: "/dev/gpiochip0".to_string(),
            dio_pin: 24,
            clk_pin: 23,
            driver: DriverSettings::default(),
        }
    }
}

/// Local measurement program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub program: String,
    pub args: Vec<String>,

    /// The program is killed after this many seconds
    pub timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            program: "./r4dcb08".to_string(),
            args: vec!["-f".to_string()],
            timeout_secs: 10,
        }
    }
}

/// Remote temperature source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,

    /// Defaults to `thermodisplay-<pid>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    pub keep_alive_secs: u64,

    /// Upper bound for one connection attempt in milliseconds
    pub connect_timeout_ms: u64,

    /// Seconds without a good reading before the value is stale; 0 disables
    pub watchdog_secs: u64,

    #[serde(flatten)]
    pub backoff: BackoffSettings,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "sensors/temperature".to_string(),
            client_id: None,
            keep_alive_secs: 60,
            connect_timeout_ms: 1000,
            watchdog_secs: 0,
            backoff: BackoffSettings::default(),
        }
    }
}

//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/isov.toml` (base configuration)
//! 2. Environment variables (prefixed with `ISOV_`)
//!
//! Every field has a default matching the shield's factory wiring, so an
//! empty file (or no file at all) yields a working configuration.
//!
//! # Example
//! ```no_run
//! use isov::config::IsovConfig;
//!
//! let config = IsovConfig::load()?;
//! config.validate()?;
//! println!("Device: {}", config.device.name);
//! # Ok::<(), isov::IsovError>(())
//! ```
//!
//! ```toml
//! [device]
//! name = "isov"
//! log_level = "debug"
//!
//! [counter]
//! kind = "mapped"
//! base_address = 0x3F003000
//! offset = 4
//!
//! [[channels]]
//! index = 0
//! gpio = 2
//! coefficient = 7692308
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::channel::{CHANNEL_COUNT, DEFAULT_COEFFICIENT};
use crate::error::{IsovError, Result};

/// GPIO line wired to each voltage-to-frequency converter, by channel.
pub const DEFAULT_GPIO_LINES: [u32; CHANNEL_COUNT] = [2, 22, 10, 5, 26];

/// Physical base of the BCM2708 system timer page.
pub const DEFAULT_TIMER_BASE: u64 = 0x3F00_3000;

/// Offset of the low 32-bit counter word within the timer page.
pub const DEFAULT_TIMER_OFFSET: u64 = 4;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsovConfig {
    /// Device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Counter source settings
    #[serde(default)]
    pub counter: CounterConfig,
    /// Channel definitions
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    /// Simulator settings (CLI only)
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Device-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name the device is registered under
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which counter implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// Host monotonic clock
    #[default]
    Monotonic,
    /// Memory-mapped hardware timer
    Mapped,
}

/// Counter source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Counter implementation
    #[serde(default)]
    pub kind: CounterKind,
    /// Physical memory device used by the mapped counter
    #[serde(default = "default_mem_path")]
    pub path: PathBuf,
    /// Physical base address of the timer block
    #[serde(default = "default_timer_base")]
    pub base_address: u64,
    /// Byte offset of the counter word from `base_address`
    #[serde(default = "default_timer_offset")]
    pub offset: u64,
}

/// One channel's wiring and calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel index (0-4)
    pub index: usize,
    /// GPIO line carrying the pulse train
    #[serde(default)]
    pub gpio: Option<u32>,
    /// Human-readable label
    #[serde(default)]
    pub label: Option<String>,
    /// Calibration coefficient (`voltage = coefficient / period`)
    #[serde(default = "default_coefficient")]
    pub coefficient: i64,
    /// Whether the channel's edge source is wired up at start
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Simulated input voltages, one per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Target voltage per channel; 0 leaves the channel idle
    #[serde(default = "default_sim_voltages")]
    pub voltages: [i32; CHANNEL_COUNT],
}

// Default value functions
fn default_device_name() -> String {
    "isov".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mem_path() -> PathBuf {
    PathBuf::from("/dev/mem")
}

fn default_timer_base() -> u64 {
    DEFAULT_TIMER_BASE
}

fn default_timer_offset() -> u64 {
    DEFAULT_TIMER_OFFSET
}

fn default_coefficient() -> i64 {
    DEFAULT_COEFFICIENT
}

fn default_enabled() -> bool {
    true
}

fn default_sim_voltages() -> [i32; CHANNEL_COUNT] {
    [7692, 5000, 2500, 1000, 0]
}

fn default_channels() -> Vec<ChannelConfig> {
    (0..CHANNEL_COUNT).map(ChannelConfig::with_defaults).collect()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            kind: CounterKind::default(),
            path: default_mem_path(),
            base_address: default_timer_base(),
            offset: default_timer_offset(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            voltages: default_sim_voltages(),
        }
    }
}

impl Default for IsovConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            counter: CounterConfig::default(),
            channels: default_channels(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Factory wiring for channel `index`.
    pub fn with_defaults(index: usize) -> Self {
        Self {
            index,
            gpio: DEFAULT_GPIO_LINES.get(index).copied(),
            label: None,
            coefficient: DEFAULT_COEFFICIENT,
            enabled: true,
        }
    }

    /// Label, falling back to "Voltage to freq N".
    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Voltage to freq {}", self.index + 1))
    }
}

impl CounterConfig {
    /// Physical address of the counter word (`base_address + offset`).
    pub fn address(&self) -> Result<u64> {
        self.base_address.checked_add(self.offset).ok_or_else(|| {
            invalid(format!(
                "Counter address 0x{:X} + 0x{:X} overflows",
                self.base_address, self.offset
            ))
        })
    }
}

impl IsovConfig {
    /// Load configuration from `config/isov.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `ISOV_`.
    /// Nested keys are separated by a double underscore.
    /// Example: `ISOV_DEVICE__LOG_LEVEL=debug`
    pub fn load() -> Result<Self> {
        Self::load_from("config/isov.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(IsovConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ISOV_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.device.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.device.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.name.is_empty() {
            return Err(invalid("Device name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.index >= CHANNEL_COUNT {
                return Err(invalid(format!(
                    "Channel index {} out of range (0-{})",
                    channel.index,
                    CHANNEL_COUNT - 1
                )));
            }
            if !seen.insert(channel.index) {
                return Err(invalid(format!("Duplicate channel index: {}", channel.index)));
            }
            if channel.coefficient <= 0 {
                return Err(invalid(format!(
                    "Channel {} coefficient must be positive, got {}",
                    channel.index, channel.coefficient
                )));
            }
        }

        if self.counter.kind == CounterKind::Mapped {
            let address = self.counter.address()?;
            if address % 4 != 0 {
                return Err(invalid(format!(
                    "Counter address 0x{address:X} is not 4-byte aligned"
                )));
            }
        }

        Ok(())
    }

    /// Calibration coefficient per channel; unlisted channels use the default.
    pub fn coefficients(&self) -> [i64; CHANNEL_COUNT] {
        let mut out = [DEFAULT_COEFFICIENT; CHANNEL_COUNT];
        for channel in &self.channels {
            if let Some(slot) = out.get_mut(channel.index) {
                *slot = channel.coefficient;
            }
        }
        out
    }

    /// Channels whose edge source should be wired at start.
    pub fn enabled_channels(&self) -> Vec<&ChannelConfig> {
        self.channels.iter().filter(|ch| ch.enabled).collect()
    }
}

fn invalid(message: String) -> IsovError {
    IsovError::InvalidConfig { message }
}

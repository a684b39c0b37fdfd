use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::ble::discovery::DiscoveryPolicy;
use crate::control::run_loop::{AudioSensitivity, ColorSensitivity, LoopSettings};
use crate::control::smoothing::{Smoothing, SmoothingMode};
use crate::screen::capture::Rect;

/// Used when neither the command line nor the config file names a device.
pub const DEFAULT_DEVICE_ID: &str = "be:89:d0:01:7b:9c";

const APP_NAME: &str = "dynamic-leds";
const REPLAY_FIELDS: usize = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected {expected} ';'-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub service: Option<String>,
    pub characteristic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub sensitivity: AudioSensitivity,
}

#[derive(Debug, Deserialize)]
pub struct ColorConfig {
    #[serde(default)]
    pub sensitivity: ColorSensitivity,
    #[serde(default = "default_region")]
    pub region: RegionConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RegionConfig {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub smoothing: SmoothingMode,
    #[serde(default = "default_smoothness")]
    pub smoothness: u32,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_color_every")]
    pub color_every: u32,
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_scan_seconds")]
    pub seconds: u64,
    #[serde(default)]
    pub policy: DiscoveryPolicy,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            sensitivity: ColorSensitivity::default(),
            region: default_region(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            smoothing: SmoothingMode::default(),
            smoothness: default_smoothness(),
            period_ms: default_period_ms(),
            color_every: default_color_every(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seconds: default_scan_seconds(),
            policy: DiscoveryPolicy::default(),
        }
    }
}

fn default_region() -> RegionConfig {
    let rect = Rect::centered_half();
    RegionConfig { x: rect.x, y: rect.y, width: rect.width, height: rect.height }
}
fn default_smoothness() -> u32 { 10 }
fn default_period_ms() -> u64 { 50 }
fn default_color_every() -> u32 { 10 }
fn default_scan_seconds() -> u64 { 10 }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Explicit path, else `dynamic-leds.toml` here, else the per-user config.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    let local = PathBuf::from(format!("{}.toml", APP_NAME));
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join(APP_NAME).join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join(APP_NAME).join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Everything a run needs, after file, command line and replay string are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub smoothing: SmoothingMode,
    pub smoothness: u32,
    pub audio: AudioSensitivity,
    pub color: ColorSensitivity,
    pub device_id: Option<String>,
    pub device_name: String,
    pub service: Option<String>,
    pub characteristic: Option<String>,
    pub period: Duration,
    pub color_every: u32,
    pub region: Rect,
    pub scan_duration: Duration,
    pub policy: DiscoveryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunConfig {
    pub fn from_config(config: &Config) -> Self {
        let region = config.color.region;
        Self {
            smoothing: config.control.smoothing,
            smoothness: config.control.smoothness,
            audio: config.audio.sensitivity,
            color: config.color.sensitivity,
            device_id: non_empty(config.device.id.as_deref()),
            device_name: config.device.name.clone().unwrap_or_default(),
            service: non_empty(config.device.service.as_deref()),
            characteristic: non_empty(config.device.characteristic.as_deref()),
            period: Duration::from_millis(config.control.period_ms.max(1)),
            color_every: config.control.color_every.max(1),
            region: Rect::new(region.x, region.y, region.width, region.height),
            scan_duration: Duration::from_secs(config.discovery.seconds),
            policy: config.discovery.policy,
        }
    }

    pub fn from_replay(text: &str) -> Result<Self, ConfigError> {
        Self::default().with_replay(text)
    }

    /// Overwrites the replayable fields, keeping the rest of `self`.
    pub fn with_replay(mut self, text: &str) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = text.trim().split(';').collect();
        if fields.len() != REPLAY_FIELDS {
            return Err(ConfigError::FieldCount {
                expected: REPLAY_FIELDS,
                found: fields.len(),
            });
        }

        self.smoothing = SmoothingMode::parse(fields[0]).ok_or_else(|| invalid("smoothingMode", fields[0]))?;
        self.smoothness = fields[1]
            .trim()
            .parse()
            .map_err(|_| invalid("smoothingValue", fields[1]))?;
        self.audio = AudioSensitivity::parse(fields[2]).ok_or_else(|| invalid("audioSensibility", fields[2]))?;
        self.color = ColorSensitivity::parse(fields[3]).ok_or_else(|| invalid("colorSensibility", fields[3]))?;
        self.device_id = Some(
            non_empty(Some(fields[4])).ok_or_else(|| invalid("deviceId", fields[4]))?,
        );
        self.device_name = fields[5].to_string();
        self.service = non_empty(Some(fields[6]));
        self.characteristic = non_empty(Some(fields[7]));

        Ok(self)
    }

    pub fn to_replay(&self) -> String {
        [
            self.smoothing.as_str().to_string(),
            self.smoothness.to_string(),
            self.audio.as_str().to_string(),
            self.color.as_str().to_string(),
            self.device_id.clone().unwrap_or_default(),
            self.device_name.replace(';', ","),
            self.service.clone().unwrap_or_default(),
            self.characteristic.clone().unwrap_or_default(),
        ]
        .join(";")
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            period: self.period,
            color_every: self.color_every,
            audio: self.audio,
            color: self.color,
            smoothing: Smoothing::from_parts(self.smoothing, self.smoothness),
        }
    }
}

fn invalid(field: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

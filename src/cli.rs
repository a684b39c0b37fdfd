use clap::Parser;
use std::path::PathBuf;

use crate::ble::discovery::DiscoveryPolicy;
use crate::control::run_loop::{AudioSensitivity, ColorSensitivity};
use crate::control::smoothing::SmoothingMode;

#[derive(Parser, Debug)]
#[command(
    name = "dynamic-leds",
    version,
    about = "Drives a BLE LED strip from system audio and screen color"
)]
pub struct Cli {
    /// Device id (Bluetooth address), or a saved replay string containing ';'
    pub target: Option<String>,

    /// Config file (defaults to dynamic-leds.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List nearby devices and exit
    #[arg(long)]
    pub scan: bool,

    /// Discovery duration in seconds
    #[arg(long)]
    pub scan_seconds: Option<u64>,

    /// How discovered devices are kept
    #[arg(long, value_enum)]
    pub policy: Option<DiscoveryPolicy>,

    /// Brightness smoothing mode
    #[arg(short, long, value_enum)]
    pub smoothing: Option<SmoothingMode>,

    /// Smoothness for `--smoothing value` (step is 100 / N per tick)
    #[arg(long)]
    pub smoothness: Option<u32>,

    /// Audio signal driving brightness
    #[arg(short, long, value_enum)]
    pub audio: Option<AudioSensitivity>,

    /// Screen color tracking
    #[arg(long, value_enum)]
    pub color: Option<ColorSensitivity>,

    /// GATT service UUID to write to
    #[arg(long)]
    pub service: Option<String>,

    /// GATT characteristic UUID to write to
    #[arg(long)]
    pub characteristic: Option<String>,
}

impl Cli {
    pub fn replay(&self) -> Option<&str> {
        self.target.as_deref().filter(|t| t.contains(';'))
    }

    pub fn device_id(&self) -> Option<&str> {
        self.target.as_deref().filter(|t| !t.contains(';'))
    }
}

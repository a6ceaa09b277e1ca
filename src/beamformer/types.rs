use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::raster::AngularSetpoint;

pub const THETA_MAX_DEG: f64 = 45.0;
pub const PHI_MAX_DEG: f64 = 360.0;

/// Limits reported by the device once, at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLimits {
    pub gain_min_db: f64,
    pub gain_max_db: f64,
    pub board_count: u32,
    pub calibration_version: Option<String>,
}

impl DeviceLimits {
    pub fn dynamic_range(&self) -> (f64, f64) {
        (self.gain_min_db, self.gain_max_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandStatus {
    Ok,
    Error {
        code: String,
        message: Option<String>,
    },
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamformerState {
    pub applied_setpoint: Option<AngularSetpoint>,
    pub dynamic_range: (f64, f64),
    pub setup_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeamformerConfig {
    /// Beamformer reached through the vendor bridge service.
    Bridge(BridgeConfig),
    /// In-process stand-in for dry runs.
    Simulated(SimulatedConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    pub address: String,
    pub serial: String,
    #[serde(
        default = "default_bridge_timeout",
        deserialize_with = "crate::config::deserialize_duration"
    )]
    pub timeout: Duration,
}

fn default_bridge_timeout() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_gain_min")]
    pub gain_min_db: f64,
    #[serde(default = "default_gain_max")]
    pub gain_max_db: f64,
    #[serde(default = "default_board_count")]
    pub board_count: u32,
}

fn default_gain_min() -> f64 {
    -7.5
}

fn default_gain_max() -> f64 {
    10.5
}

fn default_board_count() -> u32 {
    1
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            gain_min_db: default_gain_min(),
            gain_max_db: default_gain_max(),
            board_count: default_board_count(),
        }
    }
}

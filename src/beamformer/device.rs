use log::info;

use super::bridge::BridgeBeamformer;
use super::error::BeamformerError;
use super::types::{BeamformerConfig, CommandStatus, DeviceLimits, SimulatedConfig};
use crate::raster::AngularSetpoint;

/// What the scan pipeline needs from a beamforming device.
///
/// Calls are synchronous; `apply` never validates, that is the adapter's job.
pub trait Beamformer: Send {
    fn name(&self) -> &str;
    fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError>;
    fn apply(&mut self, gain_db: f64, theta_deg: f64, phi_deg: f64) -> CommandStatus;
    fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError>;
}

pub enum Device {
    Bridge(BridgeBeamformer),
    Simulated(SimulatedBeamformer),
}

impl Device {
    pub fn from_config(config: &BeamformerConfig) -> Result<Self, BeamformerError> {
        match config {
            BeamformerConfig::Bridge(bridge) => {
                info!("Connecting to beamformer bridge at {}", bridge.address);
                Ok(Device::Bridge(BridgeBeamformer::connect(bridge)?))
            }
            BeamformerConfig::Simulated(simulated) => {
                info!("Using simulated beamformer");
                Ok(Device::Simulated(SimulatedBeamformer::new(simulated.clone())))
            }
        }
    }
}

impl Beamformer for Device {
    fn name(&self) -> &str {
        match self {
            Device::Bridge(d) => d.name(),
            Device::Simulated(d) => d.name(),
        }
    }

    fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError> {
        match self {
            Device::Bridge(d) => d.query_limits(),
            Device::Simulated(d) => d.query_limits(),
        }
    }

    fn apply(&mut self, gain_db: f64, theta_deg: f64, phi_deg: f64) -> CommandStatus {
        match self {
            Device::Bridge(d) => d.apply(gain_db, theta_deg, phi_deg),
            Device::Simulated(d) => d.apply(gain_db, theta_deg, phi_deg),
        }
    }

    fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError> {
        match self {
            Device::Bridge(d) => d.query_state(),
            Device::Simulated(d) => d.query_state(),
        }
    }
}

pub struct SimulatedBeamformer {
    config: SimulatedConfig,
    beam: Option<AngularSetpoint>,
    commands: usize,
}

impl SimulatedBeamformer {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            beam: None,
            commands: 0,
        }
    }

    pub fn commands(&self) -> usize {
        self.commands
    }
}

impl Beamformer for SimulatedBeamformer {
    fn name(&self) -> &str {
        "simulated"
    }

    fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError> {
        Ok(DeviceLimits {
            gain_min_db: self.config.gain_min_db,
            gain_max_db: self.config.gain_max_db,
            board_count: self.config.board_count,
            calibration_version: None,
        })
    }

    fn apply(&mut self, gain_db: f64, theta_deg: f64, phi_deg: f64) -> CommandStatus {
        self.commands += 1;
        self.beam = Some(AngularSetpoint::new(theta_deg, phi_deg).with_gain(Some(gain_db)));
        CommandStatus::Ok
    }

    fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError> {
        Ok(self.beam)
    }
}

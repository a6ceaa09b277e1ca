mod adapter;
mod bridge;
mod device;
mod error;
mod types;

pub use adapter::BeamformerAdapter;
pub use device::{Beamformer, Device, SimulatedBeamformer};
pub use error::{BeamformerError, ValidationError};
pub use types::{BeamformerConfig, CommandStatus, DeviceLimits, SimulatedConfig};

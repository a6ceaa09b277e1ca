use log::{debug, error, info, warn};

use super::device::Beamformer;
use super::error::{BeamformerError, ValidationError};
use super::types::{BeamformerState, CommandStatus, DeviceLimits, PHI_MAX_DEG, THETA_MAX_DEG};
use crate::raster::AngularSetpoint;

/// Owns a beamformer device and the only copy of its applied beam state.
pub struct BeamformerAdapter<B: Beamformer> {
    device: B,
    limits: DeviceLimits,
    state: BeamformerState,
}

impl<B: Beamformer> BeamformerAdapter<B> {
    /// Queries the device limits once; every later command is checked against them.
    pub fn setup(mut device: B) -> Result<Self, BeamformerError> {
        let limits = device.query_limits()?;
        let (gain_min, gain_max) = limits.dynamic_range();
        if !(gain_min <= gain_max) {
            return Err(BeamformerError::InvalidLimits(format!(
                "gain range [{}, {}]",
                gain_min, gain_max
            )));
        }
        info!(
            "Beamformer {} ready: gain [{}, {}] dB, {} board(s), calibration {}",
            device.name(),
            gain_min,
            gain_max,
            limits.board_count,
            limits.calibration_version.as_deref().unwrap_or("unknown")
        );
        Ok(Self {
            device,
            state: BeamformerState {
                applied_setpoint: None,
                dynamic_range: (gain_min, gain_max),
                setup_complete: true,
            },
            limits,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &BeamformerState {
        &self.state
    }

    #[cfg(test)]
    pub fn device(&self) -> &B {
        &self.device
    }

    #[cfg(test)]
    pub fn device_mut(&mut self) -> &mut B {
        &mut self.device
    }

    /// Explicit gain, else the last applied gain, else the device maximum.
    pub fn resolve_gain(&self, requested: Option<f64>) -> f64 {
        requested
            .or_else(|| self.state.applied_setpoint.and_then(|s| s.gain_db))
            .unwrap_or(self.limits.gain_max_db)
    }

    pub fn validate(&self, setpoint: &AngularSetpoint) -> Result<AngularSetpoint, ValidationError> {
        let gain = self.resolve_gain(setpoint.gain_db);
        let (min, max) = self.limits.dynamic_range();
        if !(min..=max).contains(&gain) {
            return Err(ValidationError::Gain {
                value: gain,
                min,
                max,
            });
        }
        if !(0.0..=THETA_MAX_DEG).contains(&setpoint.theta_deg) {
            return Err(ValidationError::Theta(setpoint.theta_deg));
        }
        if !(0.0..PHI_MAX_DEG).contains(&setpoint.phi_deg) {
            return Err(ValidationError::Phi(setpoint.phi_deg));
        }
        Ok(setpoint.with_gain(Some(gain)))
    }

    /// Validates and commands one beam. Returns the setpoint as applied, with
    /// its resolved gain. State only changes when the device accepts.
    pub fn try_apply(
        &mut self,
        setpoint: &AngularSetpoint,
    ) -> Result<AngularSetpoint, BeamformerError> {
        let resolved = self.validate(setpoint).inspect_err(|e| {
            error!(
                "Rejected {} setpoint for {}: {}",
                e.field(),
                self.device.name(),
                e
            );
        })?;
        let gain = resolved.gain_db.unwrap_or(self.limits.gain_max_db);

        match self
            .device
            .apply(gain, resolved.theta_deg, resolved.phi_deg)
        {
            CommandStatus::Ok => {
                debug!("{} beam set: {}", self.device.name(), resolved);
                self.state.applied_setpoint = Some(resolved);
                Ok(resolved)
            }
            CommandStatus::Error { code, message } => {
                let message = message.unwrap_or_default();
                error!(
                    "Failed to set {} beam {}: {} {}",
                    self.device.name(),
                    resolved,
                    code,
                    message
                );
                Err(BeamformerError::DeviceCommand { code, message })
            }
        }
    }

    pub fn apply(&mut self, setpoint: &AngularSetpoint) -> bool {
        self.try_apply(setpoint).is_ok()
    }

    /// Reads the beam back from the device. Returns false when the device
    /// reports a beam other than the last applied one. A device that reports
    /// no beam is taken to agree.
    pub fn verify(&mut self) -> Result<bool, BeamformerError> {
        let Some(reported) = self.device.query_state()? else {
            return Ok(true);
        };
        if self.state.applied_setpoint == Some(reported) {
            return Ok(true);
        }
        warn!(
            "{} reports beam {}, expected {}",
            self.device.name(),
            reported,
            self.state
                .applied_setpoint
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(false)
    }

    /// Points the beam along the bore axis at maximum gain.
    pub fn boresight(&mut self) -> bool {
        let setpoint = AngularSetpoint::boresight().with_gain(Some(self.limits.gain_max_db));
        self.apply(&setpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::device::SimulatedBeamformer;
    use crate::beamformer::types::SimulatedConfig;

    struct Rejecting {
        commands: usize,
    }

    impl Beamformer for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError> {
            Ok(DeviceLimits {
                gain_min_db: 0.0,
                gain_max_db: 10.0,
                board_count: 1,
                calibration_version: None,
            })
        }

        fn apply(&mut self, _gain: f64, _theta: f64, _phi: f64) -> CommandStatus {
            self.commands += 1;
            CommandStatus::Error {
                code: "ERROR".to_string(),
                message: None,
            }
        }

        fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError> {
            Ok(None)
        }
    }

    fn simulated() -> BeamformerAdapter<SimulatedBeamformer> {
        BeamformerAdapter::setup(SimulatedBeamformer::new(SimulatedConfig {
            gain_min_db: -5.0,
            gain_max_db: 12.0,
            board_count: 2,
        }))
        .unwrap()
    }

    #[test]
    fn applied_setpoint_is_read_back() {
        let mut adapter = simulated();
        assert!(adapter.state().setup_complete);
        for (gain, theta, phi) in [(3.0, 0.0, 0.0), (-5.0, 45.0, 359.9), (12.0, 22.5, 180.0)] {
            let setpoint = AngularSetpoint::new(theta, phi).with_gain(Some(gain));
            assert!(adapter.apply(&setpoint));
            assert_eq!(adapter.state().applied_setpoint, Some(setpoint));
            assert_eq!(adapter.device_mut().query_state().unwrap(), Some(setpoint));
        }
    }

    #[test]
    fn verify_flags_a_beam_moved_behind_the_adapter() {
        let mut adapter = simulated();
        assert!(adapter.verify().unwrap());
        assert!(adapter.apply(&AngularSetpoint::new(10.0, 20.0).with_gain(Some(1.0))));
        assert!(adapter.verify().unwrap());

        assert!(adapter.device_mut().apply(1.0, 30.0, 20.0).is_ok());
        assert!(!adapter.verify().unwrap());
        assert!(adapter.boresight());
        assert!(adapter.verify().unwrap());
    }

    #[test]
    fn out_of_range_values_fail_without_device_contact() {
        let mut adapter = simulated();
        let good = AngularSetpoint::new(10.0, 20.0).with_gain(Some(1.0));
        assert!(adapter.apply(&good));
        let before = adapter.state().clone();

        let bad = [
            AngularSetpoint::new(10.0, 20.0).with_gain(Some(12.5)),
            AngularSetpoint::new(10.0, 20.0).with_gain(Some(-5.1)),
            AngularSetpoint::new(45.1, 20.0),
            AngularSetpoint::new(-1.0, 20.0),
            AngularSetpoint::new(10.0, 360.0),
            AngularSetpoint::new(10.0, -0.5),
            AngularSetpoint::new(f64::NAN, 20.0),
        ];
        for setpoint in bad {
            assert!(!adapter.apply(&setpoint), "{setpoint} accepted");
        }
        assert_eq!(adapter.device().commands(), 1);
        assert_eq!(adapter.state(), &before);
    }

    #[test]
    fn validation_names_the_offending_field() {
        let adapter = simulated();
        let err = adapter
            .validate(&AngularSetpoint::new(50.0, 0.0))
            .unwrap_err();
        assert_eq!(err, ValidationError::Theta(50.0));
        assert_eq!(err.field(), "theta");
        let err = adapter
            .validate(&AngularSetpoint::new(5.0, 0.0).with_gain(Some(20.0)))
            .unwrap_err();
        assert_eq!(err.field(), "gain");
    }

    #[test]
    fn gain_defaults_to_max_then_last_applied() {
        let mut adapter = simulated();
        let applied = adapter.try_apply(&AngularSetpoint::new(5.0, 0.0)).unwrap();
        assert_eq!(applied.gain_db, Some(12.0));

        adapter
            .try_apply(&AngularSetpoint::new(5.0, 20.0).with_gain(Some(4.0)))
            .unwrap();
        let applied = adapter.try_apply(&AngularSetpoint::new(10.0, 0.0)).unwrap();
        assert_eq!(applied.gain_db, Some(4.0));
    }

    #[test]
    fn device_rejection_leaves_state_unchanged() {
        let mut adapter = BeamformerAdapter::setup(Rejecting { commands: 0 }).unwrap();
        let result = adapter.try_apply(&AngularSetpoint::new(5.0, 20.0));
        assert!(matches!(result, Err(BeamformerError::DeviceCommand { .. })));
        assert_eq!(adapter.state().applied_setpoint, None);
        assert_eq!(adapter.device().commands, 1);
    }

    #[test]
    fn boresight_uses_max_gain() {
        let mut adapter = simulated();
        assert!(adapter.boresight());
        let applied = adapter.state().applied_setpoint.unwrap();
        assert!(applied.is_boresight());
        assert_eq!(applied.gain_db, Some(12.0));
    }
}

use std::iter::FusedIterator;

use thiserror::Error;

use super::types::{AngularSetpoint, RasterConfig};

/// Largest raster accepted, boresight included.
pub const MAX_SETPOINTS: usize = 1_000_000;

// Upper bounds are exclusive. A bound that lands on a step boundary within
// this relative tolerance is treated as exactly on it.
const STEP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum RasterError {
    #[error("raster of {theta_steps} x {phi_steps} beams exceeds {max} setpoints", max = MAX_SETPOINTS)]
    TooLarge { theta_steps: f64, phi_steps: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Axis {
    start: f64,
    step: f64,
    len: usize,
}

impl Axis {
    fn new(range: [f64; 2], step: f64, len: usize) -> Self {
        Self {
            start: range[0],
            step,
            len,
        }
    }

    /// Step count, kept as a float until it is known to fit.
    fn steps(range: [f64; 2], step: f64) -> f64 {
        let span = range[1] - range[0];
        if step > 0.0 && step.is_finite() && span > 0.0 && span.is_finite() {
            ((span / step) - STEP_TOLERANCE).ceil().max(0.0)
        } else {
            0.0
        }
    }

    fn value(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }
}

/// Pull-based beam raster: boresight first, then theta-major over the
/// stepped ranges.
///
/// The raster is consumed as it is iterated; build a new one to scan again.
#[derive(Debug, Clone)]
pub struct Raster {
    theta: Axis,
    phi: Axis,
    gain_db: Option<f64>,
    cursor: usize,
}

impl Raster {
    /// Rejects rasters with more than [`MAX_SETPOINTS`] setpoints.
    pub fn new(config: &RasterConfig) -> Result<Self, RasterError> {
        let theta_steps = Axis::steps(config.theta_range, config.theta_step);
        let phi_steps = Axis::steps(config.phi_range, config.phi_step);
        let too_large = RasterError::TooLarge {
            theta_steps,
            phi_steps,
        };
        let limit = MAX_SETPOINTS as f64;
        if theta_steps >= limit || phi_steps >= limit {
            return Err(too_large);
        }
        let (theta_len, phi_len) = (theta_steps as usize, phi_steps as usize);
        match theta_len.checked_mul(phi_len).and_then(|n| n.checked_add(1)) {
            Some(total) if total <= MAX_SETPOINTS => {}
            _ => return Err(too_large),
        }

        Ok(Self {
            theta: Axis::new(config.theta_range, config.theta_step, theta_len),
            phi: Axis::new(config.phi_range, config.phi_step, phi_len),
            gain_db: config.gain_db,
            cursor: 0,
        })
    }

    /// Total number of setpoints, boresight included.
    pub fn total(&self) -> usize {
        1 + self.theta.len * self.phi.len
    }

    fn setpoint_at(&self, position: usize) -> AngularSetpoint {
        let setpoint = if position == 0 {
            AngularSetpoint::boresight()
        } else {
            let k = position - 1;
            AngularSetpoint::new(
                self.theta.value(k / self.phi.len),
                self.phi.value(k % self.phi.len),
            )
        };
        setpoint.with_gain(self.gain_db)
    }
}

impl Iterator for Raster {
    type Item = AngularSetpoint;

    fn next(&mut self) -> Option<AngularSetpoint> {
        if self.cursor >= self.total() {
            return None;
        }
        let setpoint = self.setpoint_at(self.cursor);
        self.cursor += 1;
        Some(setpoint)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Raster {}

impl FusedIterator for Raster {}

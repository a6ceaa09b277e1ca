use serde::{Deserialize, Serialize};

/// A single beam direction, with an optional gain request.
///
/// `theta_deg` is the polar angle from the bore axis, `phi_deg` the azimuth in
/// the array plane. A `None` gain asks the beamformer adapter to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngularSetpoint {
    pub theta_deg: f64,
    pub phi_deg: f64,
    #[serde(default)]
    pub gain_db: Option<f64>,
}

impl AngularSetpoint {
    pub fn new(theta_deg: f64, phi_deg: f64) -> Self {
        Self {
            theta_deg,
            phi_deg,
            gain_db: None,
        }
    }

    pub fn boresight() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn with_gain(self, gain_db: Option<f64>) -> Self {
        Self { gain_db, ..self }
    }

    #[cfg(test)]
    pub fn is_boresight(&self) -> bool {
        self.theta_deg == 0.0 && self.phi_deg == 0.0
    }
}

impl std::fmt::Display for AngularSetpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gain_db {
            Some(gain) => write!(
                f,
                "theta={}° phi={}° gain={}dB",
                self.theta_deg, self.phi_deg, gain
            ),
            None => write!(f, "theta={}° phi={}°", self.theta_deg, self.phi_deg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "default_theta_range")]
    pub theta_range: [f64; 2],
    #[serde(default = "default_phi_range")]
    pub phi_range: [f64; 2],
    #[serde(default = "default_theta_step")]
    pub theta_step: f64,
    #[serde(default = "default_phi_step")]
    pub phi_step: f64,
    #[serde(default)]
    pub gain_db: Option<f64>,
}

fn default_theta_range() -> [f64; 2] {
    [1.0, 45.0]
}

fn default_phi_range() -> [f64; 2] {
    [0.0, 359.9]
}

fn default_theta_step() -> f64 {
    5.0
}

fn default_phi_step() -> f64 {
    20.0
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            theta_range: default_theta_range(),
            phi_range: default_phi_range(),
            theta_step: default_theta_step(),
            phi_step: default_phi_step(),
            gain_db: None,
        }
    }
}

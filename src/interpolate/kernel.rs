use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::projection::PlanarPoint;

/// Lower and upper bound shared by every hyperparameter.
pub const HYPERPARAMETER_BOUNDS: (f64, f64) = (1e-5, 1e5);

/// `constant * RBF(length_scale) + White(noise_level)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub constant: f64,
    pub length_scale: f64,
    pub noise_level: f64,
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            constant: 0.0224 * 0.0224,
            length_scale: 0.179,
            noise_level: 2.79e-5,
        }
    }
}

impl Kernel {
    pub(crate) fn from_log(theta: &[f64; 3]) -> Self {
        Self {
            constant: theta[0].exp(),
            length_scale: theta[1].exp(),
            noise_level: theta[2].exp(),
        }
    }

    pub(crate) fn to_log(self) -> [f64; 3] {
        [
            self.constant.ln(),
            self.length_scale.ln(),
            self.noise_level.ln(),
        ]
    }

    pub fn is_valid(&self) -> bool {
        [self.constant, self.length_scale, self.noise_level]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }

    /// Spatially correlated part only.
    pub fn signal(&self, a: &PlanarPoint, b: &PlanarPoint) -> f64 {
        self.constant * (-0.5 * squared_distance(a, b) / (self.length_scale * self.length_scale)).exp()
    }

    /// Prior variance at any single point, noise included.
    pub fn diag(&self) -> f64 {
        self.constant + self.noise_level
    }

    /// Training covariance with the noise term on the diagonal.
    pub fn covariance(&self, points: &[PlanarPoint]) -> DMatrix<f64> {
        let n = points.len();
        let mut k = DMatrix::from_fn(n, n, |i, j| self.signal(&points[i], &points[j]));
        for i in 0..n {
            k[(i, i)] += self.noise_level;
        }
        k
    }

    /// Covariance between distinct point sets; the noise term does not correlate them.
    pub fn cross_covariance(&self, a: &[PlanarPoint], b: &[PlanarPoint]) -> DMatrix<f64> {
        DMatrix::from_fn(a.len(), b.len(), |i, j| self.signal(&a[i], &b[j]))
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3}**2 * RBF(length_scale={:.3}) + WhiteKernel(noise_level={:.3e})",
            self.constant.sqrt(),
            self.length_scale,
            self.noise_level
        )
    }
}

pub(crate) fn squared_distance(a: &PlanarPoint, b: &PlanarPoint) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covariance_is_symmetric_with_noise_on_diagonal() {
        let kernel = Kernel::default();
        let points = [[0.0, 0.0], [0.1, 0.0], [0.0, 0.5]];
        let k = kernel.covariance(&points);
        for i in 0..3 {
            assert!((k[(i, i)] - kernel.diag()).abs() < 1e-15);
            for j in 0..3 {
                assert_eq!(k[(i, j)], k[(j, i)]);
            }
        }
        let cross = kernel.cross_covariance(&points, &points);
        assert!((cross[(0, 0)] - kernel.constant).abs() < 1e-15);
    }

    #[test]
    fn correlation_decays_with_distance() {
        let kernel = Kernel {
            constant: 1.0,
            length_scale: 0.2,
            noise_level: 1e-5,
        };
        let origin = [0.0, 0.0];
        let near = kernel.signal(&origin, &[0.05, 0.0]);
        let far = kernel.signal(&origin, &[0.5, 0.0]);
        assert!(near > far);
        assert!((kernel.signal(&origin, &[0.2, 0.0]) - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn log_parameters_round_trip() {
        let kernel = Kernel::default();
        let back = Kernel::from_log(&kernel.to_log());
        assert!((back.constant - kernel.constant).abs() < 1e-15);
        assert!((back.length_scale - kernel.length_scale).abs() < 1e-15);
        assert!((back.noise_level - kernel.noise_level).abs() < 1e-18);
    }
}

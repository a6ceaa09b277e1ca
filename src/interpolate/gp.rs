use std::f64::consts::PI;

use log::{debug, info};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::error::InterpolationError;
use super::kernel::{squared_distance, Kernel, HYPERPARAMETER_BOUNDS};
use super::projection::PlanarPoint;

// Added to the training diagonal for numerical stability.
const JITTER: f64 = 1e-10;
const MAX_ITERATIONS: usize = 200;
const MAX_STEP: f64 = 2.0;
const MIN_STEP: f64 = 1e-6;
const GRADIENT_TOLERANCE: f64 = 1e-8;
const RELATIVE_IMPROVEMENT: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerOptions {
    /// Random starts in addition to the initial kernel.
    pub restarts: usize,
    pub seed: u64,
}

struct Factorization {
    cholesky: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    log_marginal_likelihood: f64,
}

fn factorize(
    kernel: &Kernel,
    inputs: &[PlanarPoint],
    targets: &DVector<f64>,
) -> Option<Factorization> {
    let n = inputs.len();
    let mut k = kernel.covariance(inputs);
    for i in 0..n {
        k[(i, i)] += JITTER;
    }
    let cholesky = Cholesky::new(k)?;
    let alpha = cholesky.solve(targets);
    let half_log_det: f64 = cholesky.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
    let log_marginal_likelihood =
        -0.5 * targets.dot(&alpha) - half_log_det - 0.5 * n as f64 * (2.0 * PI).ln();
    log_marginal_likelihood
        .is_finite()
        .then_some(Factorization {
            cholesky,
            alpha,
            log_marginal_likelihood,
        })
}

// d(log likelihood)/d(log parameter) for (constant, length_scale, noise_level):
// 0.5 * tr((alpha alpha^T - K^-1) dK).
fn gradient(kernel: &Kernel, inputs: &[PlanarPoint], factorization: &Factorization) -> [f64; 3] {
    let n = inputs.len();
    let alpha = &factorization.alpha;
    let w = alpha * alpha.transpose() - factorization.cholesky.inverse();
    let inv_l2 = 1.0 / (kernel.length_scale * kernel.length_scale);
    let mut grad = [0.0; 3];
    for j in 0..n {
        for i in 0..n {
            let s = kernel.signal(&inputs[i], &inputs[j]);
            grad[0] += w[(i, j)] * s;
            grad[1] += w[(i, j)] * s * squared_distance(&inputs[i], &inputs[j]) * inv_l2;
        }
    }
    grad[2] = kernel.noise_level * w.trace();
    grad.map(|g| 0.5 * g)
}

fn log_bounds() -> (f64, f64) {
    (HYPERPARAMETER_BOUNDS.0.ln(), HYPERPARAMETER_BOUNDS.1.ln())
}

// Projected gradient ascent in log-parameter space with a backtracking step.
fn ascend(
    inputs: &[PlanarPoint],
    targets: &DVector<f64>,
    start: [f64; 3],
) -> Option<(Kernel, Factorization)> {
    let (lo, hi) = log_bounds();
    let clamp = |theta: [f64; 3]| theta.map(|v| v.clamp(lo, hi));

    let mut theta = clamp(start);
    let mut kernel = Kernel::from_log(&theta);
    let mut current = factorize(&kernel, inputs, targets)?;
    let mut step = 1.0;

    for _ in 0..MAX_ITERATIONS {
        let grad = gradient(&kernel, inputs, &current);
        let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if !(norm > GRADIENT_TOLERANCE) {
            break;
        }

        let mut accepted = None;
        while step >= MIN_STEP {
            let candidate = clamp([
                theta[0] + step * grad[0] / norm,
                theta[1] + step * grad[1] / norm,
                theta[2] + step * grad[2] / norm,
            ]);
            let candidate_kernel = Kernel::from_log(&candidate);
            if let Some(next) = factorize(&candidate_kernel, inputs, targets) {
                if next.log_marginal_likelihood > current.log_marginal_likelihood {
                    accepted = Some((candidate, candidate_kernel, next));
                    break;
                }
            }
            step *= 0.5;
        }

        let Some((candidate, candidate_kernel, next)) = accepted else {
            break;
        };
        let improvement = next.log_marginal_likelihood - current.log_marginal_likelihood;
        theta = candidate;
        kernel = candidate_kernel;
        current = next;
        step = (step * 2.0).min(MAX_STEP);
        if improvement < RELATIVE_IMPROVEMENT * (1.0 + current.log_marginal_likelihood.abs()) {
            break;
        }
    }

    Some((kernel, current))
}

/// Zero-mean Gaussian-process regressor over planar points.
pub struct GaussianProcess {
    kernel: Kernel,
    inputs: Vec<PlanarPoint>,
    targets: DVector<f64>,
    l: DMatrix<f64>,
    alpha: DVector<f64>,
    log_marginal_likelihood: f64,
}

impl GaussianProcess {
    /// Conditions on the data with the kernel as given.
    pub fn fit(
        inputs: Vec<PlanarPoint>,
        targets: Vec<f64>,
        kernel: Kernel,
    ) -> Result<Self, InterpolationError> {
        let targets = check_training_set(&inputs, targets)?;
        if !kernel.is_valid() {
            return Err(InterpolationError::InvalidKernel(kernel.to_string()));
        }
        let factorization =
            factorize(&kernel, &inputs, &targets).ok_or(InterpolationError::NotPositiveDefinite)?;
        Ok(Self::from_parts(kernel, inputs, targets, factorization))
    }

    /// Maximises the log marginal likelihood from `initial` and from
    /// `options.restarts` log-uniform random starts, keeping the best.
    pub fn optimize(
        inputs: Vec<PlanarPoint>,
        targets: Vec<f64>,
        initial: Kernel,
        options: &OptimizerOptions,
    ) -> Result<Self, InterpolationError> {
        let targets = check_training_set(&inputs, targets)?;
        if !initial.is_valid() {
            return Err(InterpolationError::InvalidKernel(initial.to_string()));
        }

        let (lo, hi) = log_bounds();
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut starts = vec![initial.to_log()];
        starts.extend((0..options.restarts).map(|_| {
            [
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
            ]
        }));

        let (kernel, factorization) = starts
            .par_iter()
            .filter_map(|start| ascend(&inputs, &targets, *start))
            .max_by(|a, b| {
                a.1.log_marginal_likelihood
                    .total_cmp(&b.1.log_marginal_likelihood)
            })
            .ok_or(InterpolationError::NotPositiveDefinite)?;

        info!(
            "Kernel optimised over {} starts: {} (log-likelihood {:.3})",
            starts.len(),
            kernel,
            factorization.log_marginal_likelihood
        );
        Ok(Self::from_parts(kernel, inputs, targets, factorization))
    }

    fn from_parts(
        kernel: Kernel,
        inputs: Vec<PlanarPoint>,
        targets: DVector<f64>,
        factorization: Factorization,
    ) -> Self {
        Self {
            kernel,
            inputs,
            targets,
            l: factorization.cholesky.l(),
            alpha: factorization.alpha,
            log_marginal_likelihood: factorization.log_marginal_likelihood,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    pub fn inputs(&self) -> &[PlanarPoint] {
        &self.inputs
    }

    pub fn targets(&self) -> &DVector<f64> {
        &self.targets
    }

    /// Predictive mean and standard deviation; the std includes the noise term.
    pub fn predict(
        &self,
        points: &[PlanarPoint],
    ) -> Result<(Vec<f64>, Vec<f64>), InterpolationError> {
        let k_star = self.kernel.cross_covariance(&self.inputs, points);
        let mean = k_star.transpose() * &self.alpha;
        let v = self
            .l
            .solve_lower_triangular(&k_star)
            .ok_or(InterpolationError::NotPositiveDefinite)?;
        let prior = self.kernel.diag();
        let std = v
            .column_iter()
            .map(|column| (prior - column.norm_squared()).max(0.0).sqrt())
            .collect();
        Ok((mean.iter().copied().collect(), std))
    }

    /// Coefficient of determination of the mean on the training inputs.
    pub fn score(&self) -> Result<f64, InterpolationError> {
        let (predicted, _) = self.predict(&self.inputs)?;
        let mean = self.targets.mean();
        let ss_res: f64 = self
            .targets
            .iter()
            .zip(&predicted)
            .map(|(y, p)| (y - p) * (y - p))
            .sum();
        let ss_tot: f64 = self.targets.iter().map(|y| (y - mean) * (y - mean)).sum();
        debug!("score: ss_res={} ss_tot={}", ss_res, ss_tot);
        Ok(if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        })
    }
}

fn check_training_set(
    inputs: &[PlanarPoint],
    targets: Vec<f64>,
) -> Result<DVector<f64>, InterpolationError> {
    if inputs.is_empty() {
        return Err(InterpolationError::EmptyTrainingSet);
    }
    if inputs.len() != targets.len() {
        return Err(InterpolationError::LengthMismatch {
            inputs: inputs.len(),
            targets: targets.len(),
        });
    }
    Ok(DVector::from_vec(targets))
}

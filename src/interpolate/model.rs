use log::{info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::InterpolationError;
use super::gp::{GaussianProcess, OptimizerOptions};
use super::kernel::Kernel;
use super::projection::{linspace, project_setpoint, PlanarPoint};
use crate::scanner::ScanSession;

/// Expected magnitude range of the rendered mean grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderRange {
    pub min: f64,
    pub max: f64,
}

impl Default for RenderRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.127,
        }
    }
}

impl RenderRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpolationConfig {
    #[serde(default = "default_resolution")]
    pub resolution: usize,
    /// When false the configured kernel is used as is.
    #[serde(default = "default_optimize")]
    pub optimize: bool,
    #[serde(default = "default_restarts")]
    pub restarts: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Half-width of the square prediction domain.
    #[serde(default = "default_extent")]
    pub extent: f64,
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default)]
    pub render_range: RenderRange,
}

fn default_resolution() -> usize {
    180
}

fn default_optimize() -> bool {
    true
}

fn default_restarts() -> usize {
    30
}

fn default_seed() -> u64 {
    42
}

fn default_extent() -> f64 {
    0.7
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            optimize: default_optimize(),
            restarts: default_restarts(),
            seed: default_seed(),
            extent: default_extent(),
            kernel: Kernel::default(),
            render_range: RenderRange::default(),
        }
    }
}

/// Fitted field plus its predictions over the square grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialModel {
    pub session_id: String,
    pub kernel: Kernel,
    pub log_marginal_likelihood: f64,
    pub score: f64,
    pub training_inputs: Vec<PlanarPoint>,
    pub training_targets: Vec<f64>,
    pub axis: Vec<f64>,
    /// `mean[(i, j)]` is the prediction at `(axis[i], axis[j])`.
    pub mean: DMatrix<f64>,
    pub std: DMatrix<f64>,
}

impl SpatialModel {
    pub fn resolution(&self) -> usize {
        self.axis.len()
    }

    /// Counts mean-grid cells outside `range`; the grid itself is untouched.
    pub fn flag_out_of_range(&self, range: &RenderRange) -> usize {
        let outside: Vec<f64> = self
            .mean
            .iter()
            .copied()
            .filter(|v| !range.contains(*v))
            .collect();
        if !outside.is_empty() {
            let lowest = outside.iter().copied().fold(f64::INFINITY, f64::min);
            let highest = outside.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            warn!(
                "{} of {} predictions outside render range [{}, {}] (min {:.4}, max {:.4})",
                outside.len(),
                self.mean.len(),
                range.min,
                range.max,
                lowest,
                highest
            );
        }
        outside.len()
    }

    /// Copy of the mean grid clamped into `range`, for rendering.
    pub fn clipped(&self, range: &RenderRange) -> DMatrix<f64> {
        self.mean.map(|v| v.clamp(range.min, range.max))
    }
}

pub fn fit(
    session: &ScanSession,
    config: &InterpolationConfig,
) -> Result<SpatialModel, InterpolationError> {
    if config.resolution == 0 {
        return Err(InterpolationError::InvalidResolution);
    }

    let (inputs, targets): (Vec<PlanarPoint>, Vec<f64>) = session
        .received()
        .filter_map(|s| s.magnitude.map(|m| (project_setpoint(&s.setpoint), m)))
        .unzip();
    if inputs.is_empty() {
        return Err(InterpolationError::InsufficientData(
            session.session_id.clone(),
        ));
    }
    info!(
        "Fitting session {} on {} of {} samples",
        session.session_id,
        inputs.len(),
        session.samples.len()
    );

    let gp = if config.optimize {
        GaussianProcess::optimize(
            inputs,
            targets,
            config.kernel,
            &OptimizerOptions {
                restarts: config.restarts,
                seed: config.seed,
            },
        )?
    } else {
        GaussianProcess::fit(inputs, targets, config.kernel)?
    };
    let score = gp.score()?;

    let axis = linspace(-config.extent, config.extent, config.resolution);
    let rows = axis
        .par_iter()
        .map(|x| {
            let points: Vec<PlanarPoint> = axis.iter().map(|y| [*x, *y]).collect();
            gp.predict(&points)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let n = axis.len();
    let mean = DMatrix::from_fn(n, n, |i, j| rows[i].0[j]);
    let std = DMatrix::from_fn(n, n, |i, j| rows[i].1[j]);

    let model = SpatialModel {
        session_id: session.session_id.clone(),
        kernel: *gp.kernel(),
        log_marginal_likelihood: gp.log_marginal_likelihood(),
        score,
        training_inputs: gp.inputs().to_vec(),
        training_targets: gp.targets().iter().copied().collect(),
        axis,
        mean,
        std,
    };
    info!(
        "Model for {}: {} (R² {:.4})",
        model.session_id, model.kernel, model.score
    );
    model.flag_out_of_range(&config.render_range);
    Ok(model)
}

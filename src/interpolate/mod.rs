mod error;
mod gp;
mod kernel;
mod model;
mod projection;

use serde::{Deserialize, Serialize};

pub use error::InterpolationError;
pub use model::{fit, InterpolationConfig, SpatialModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Fits `session` when named, otherwise the latest session of the run.
    Fit {
        #[serde(default)]
        session: Option<String>,
        #[serde(default)]
        resolution: Option<usize>,
        #[serde(default)]
        restarts: Option<usize>,
    },
}

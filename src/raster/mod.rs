mod raster;
mod types;

pub use raster::{Raster, RasterError};
pub use types::{AngularSetpoint, RasterConfig};

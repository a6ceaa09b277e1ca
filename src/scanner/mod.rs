mod sample;
mod scanner;
mod types;

pub use sample::{AbortReason, Sample, ScanSession, ScanState};
pub use scanner::Scanner;
pub use types::{AcquisitionConfig, Command};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterpolationError {
    #[error("session {0} has no received samples to fit")]
    InsufficientData(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("training inputs and targets differ in length ({inputs} vs {targets})")]
    LengthMismatch { inputs: usize, targets: usize },
    #[error("covariance matrix is not positive definite")]
    NotPositiveDefinite,
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),
    #[error("grid resolution must be at least 1")]
    InvalidResolution,
}

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("gain {value} dB outside dynamic range [{min}, {max}]")]
    Gain { value: f64, min: f64, max: f64 },
    #[error("theta {0}° outside [0, 45]")]
    Theta(f64),
    #[error("phi {0}° outside [0, 360)")]
    Phi(f64),
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Gain { .. } => "gain",
            ValidationError::Theta(_) => "theta",
            ValidationError::Phi(_) => "phi",
        }
    }
}

#[derive(Debug, Error)]
pub enum BeamformerError {
    #[error("invalid setpoint: {0}")]
    Validation(#[from] ValidationError),
    #[error("device rejected beam command ({code}): {message}")]
    DeviceCommand { code: String, message: String },
    #[error("{query} query failed ({code}): {message}")]
    Query {
        query: &'static str,
        code: String,
        message: String,
    },
    #[error("invalid device limits: {0}")]
    InvalidLimits(String),
    #[error("bridge io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("bridge closed the connection")]
    BridgeClosed,
}

mod artifacts;
mod sessions;

use thiserror::Error;

pub use artifacts::{ArtifactsManager, ExecutionLog, ProcessLogs, RunState, StepOutput, StepResult};
pub use sessions::SessionStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Model encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

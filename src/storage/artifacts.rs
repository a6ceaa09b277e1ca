use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EXECUTION_LOG: &str = "execution_log.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Aborted,
}

/// What a plan step left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    /// A saved scan session.
    Session {
        id: String,
        samples: usize,
        absent: usize,
    },
    /// A saved spatial model, keyed by its source session.
    Model { session_id: String, score: f64 },
    /// Output files of a background collaborator process.
    Process { stdout: PathBuf, stderr: PathBuf },
}

impl fmt::Display for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutput::Session {
                id,
                samples,
                absent,
            } => write!(f, "session {} ({} samples, {} absent)", id, samples, absent),
            StepOutput::Model { session_id, score } => {
                write!(f, "model for {} (R² {:.4})", session_id, score)
            }
            StepOutput::Process { stdout, .. } => write!(f, "process logs at {}", stdout.display()),
        }
    }
}

/// Where a collaborator process of one step writes its output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLogs {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl From<ProcessLogs> for StepOutput {
    fn from(logs: ProcessLogs) -> Self {
        StepOutput::Process {
            stdout: logs.stdout,
            stderr: logs.stderr,
        }
    }
}

/// Per-run folder under `<base>/artifacts/<run_id>` holding the execution
/// log and collaborator output. The log is rewritten after every change.
pub struct ArtifactsManager {
    dir: PathBuf,
    log: ExecutionLog,
}

impl ArtifactsManager {
    pub fn new(base: &Path, run_id: &str) -> io::Result<Self> {
        let dir = base.join("artifacts").join(run_id);
        fs::create_dir_all(&dir)?;
        let manager = Self {
            dir,
            log: ExecutionLog::new(run_id.to_string()),
        };
        manager.persist()?;
        Ok(manager)
    }

    pub fn process_logs(&self, step_index: usize) -> ProcessLogs {
        let path = |stream: &str| self.dir.join(format!("step_{:03}_{}.log", step_index, stream));
        ProcessLogs {
            stdout: path("stdout"),
            stderr: path("stderr"),
        }
    }

    pub fn record(&mut self, step: StepResult) -> io::Result<()> {
        self.log.step_results.push(step);
        self.persist()
    }

    pub fn finish(&mut self, state: RunState) -> io::Result<&ExecutionLog> {
        self.log.state = state;
        self.log.completed_at = Some(Utc::now());
        self.persist()?;
        Ok(&self.log)
    }

    fn persist(&self) -> io::Result<()> {
        self.log.save(&self.dir.join(EXECUTION_LOG))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub command_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub run_id: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_results: Vec<StepResult>,
}

impl ExecutionLog {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            step_results: Vec::new(),
        }
    }

    /// Ids of the sessions saved during the run, in step order.
    pub fn sessions(&self) -> impl Iterator<Item = &str> {
        self.step_results.iter().filter_map(|r| match &r.output {
            Some(StepOutput::Session { id, .. }) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Source session ids of the models saved during the run.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.step_results.iter().filter_map(|r| match &r.output {
            Some(StepOutput::Model { session_id, .. }) => Some(session_id.as_str()),
            _ => None,
        })
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| io::Error::other(format!("Failed to serialize log: {}", e)))?;
        fs::write(path, yaml)
    }

    #[cfg(test)]
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

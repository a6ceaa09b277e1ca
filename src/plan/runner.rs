use std::io;
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::parser::{Command, Plan};
use crate::abort::AbortSignal;
use crate::beamformer::Beamformer;
use crate::executor::{self, Executor};
use crate::interpolate::{self, InterpolationConfig, InterpolationError, SpatialModel};
use crate::raster::{Raster, RasterConfig, RasterError};
use crate::scanner::{self, AbortReason, ScanSession, ScanState, Scanner};
use crate::storage::{
    ArtifactsManager, ExecutionLog, ProcessLogs, RunState, SessionStore, StepOutput, StepResult,
    StorageError,
};
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("scan aborted: {0}")]
    ScanAborted(AbortReason),
    #[error("scan stopped: {0}")]
    ScanStopped(AbortReason),
    #[error("beamformer did not return to boresight")]
    ParkFailed,
    #[error("no session to fit")]
    NoSession,
    #[error("fit task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

type RunnerResult<T> = Result<T, RunnerError>;

/// Executes a plan step by step against one scanner.
pub struct Runner<B: Beamformer, T: Transport> {
    plan: Plan,
    scanner: Scanner<B, T>,
    executor: Executor,
    store: SessionStore,
    raster: RasterConfig,
    interpolation: InterpolationConfig,
    abort_rx: mpsc::Receiver<AbortSignal>,
    cancel: CancellationToken,
    last_session: Option<ScanSession>,
}

impl<B: Beamformer, T: Transport> Runner<B, T> {
    pub fn new(
        plan: Plan,
        scanner: Scanner<B, T>,
        store: SessionStore,
        raster: RasterConfig,
        interpolation: InterpolationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (abort_tx, abort_rx) = mpsc::channel();
        Self {
            plan,
            executor: Executor::new(abort_tx, cancel.clone()),
            scanner,
            store,
            raster,
            interpolation,
            abort_rx,
            cancel,
            last_session: None,
        }
    }

    pub async fn run(mut self) -> RunnerResult<ExecutionLog> {
        let run_id = format!(
            "{}_{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            uuid::Uuid::new_v4()
        );
        let mut artifacts = ArtifactsManager::new(self.store.base(), &run_id)?;
        let start = Utc::now();
        info!(
            "Starting plan run {} ({} steps)",
            run_id,
            self.plan.steps.len()
        );

        let steps = std::mem::take(&mut self.plan.steps);
        let mut state = RunState::Completed;
        for (i, step) in steps.iter().enumerate() {
            if let Some(reason) = self.pending_abort() {
                error!("Stopping plan before step {}: {}", i, reason);
                state = RunState::Aborted;
                break;
            }

            if let Some(offset) = step.time {
                if !self.wait_until(start, offset).await {
                    state = RunState::Aborted;
                    break;
                }
            }

            let started_at = Utc::now();
            info!("Step {}: {}", i, step.command.name());
            let logs = artifacts.process_logs(i);
            let outcome = self.execute(i, &step.command, logs).await;
            let failed = outcome.as_ref().err().map(ToString::to_string);
            let next_state = match &outcome {
                Ok(_) => None,
                Err(RunnerError::ScanStopped(_)) => Some(RunState::Aborted),
                Err(_) => Some(RunState::Failed),
            };
            artifacts.record(StepResult {
                step_index: i,
                command_type: step.command.name().to_string(),
                started_at,
                completed_at: Some(Utc::now()),
                success: outcome.is_ok(),
                error: failed.clone(),
                output: outcome.unwrap_or_default(),
            })?;

            if let Some(next_state) = next_state {
                error!(
                    "Step {} failed: {}",
                    i,
                    failed.unwrap_or_default()
                );
                state = next_state;
                break;
            }
        }

        self.executor.stop_all();
        if !self.scanner.park() {
            warn!("Beamformer could not be parked at the end of the run");
        }
        let log = artifacts.finish(state)?.clone();
        info!(
            "Plan run {} finished: {:?} ({} sessions, {} models)",
            run_id,
            state,
            log.sessions().count(),
            log.models().count()
        );
        Ok(log)
    }

    fn pending_abort(&self) -> Option<String> {
        if let Ok(signal) = self.abort_rx.try_recv() {
            return Some(signal.to_string());
        }
        self.cancel
            .is_cancelled()
            .then(|| "run cancelled".to_string())
    }

    /// Returns false if the run was cancelled while waiting.
    async fn wait_until(&self, start: DateTime<Utc>, offset: std::time::Duration) -> bool {
        let Ok(offset) = chrono::Duration::from_std(offset) else {
            return true;
        };
        let remaining = (start + offset - Utc::now()).to_std().unwrap_or_default();
        if remaining.is_zero() {
            return true;
        }
        info!("Waiting {:.1}s for next step", remaining.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(remaining) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn execute(
        &mut self,
        step_index: usize,
        command: &Command,
        logs: ProcessLogs,
    ) -> RunnerResult<Option<StepOutput>> {
        match command {
            Command::Executor(executor::Command::RunShell { cmd, on_fail }) => {
                self.executor.run_shell(cmd, step_index, *on_fail, &logs)?;
                Ok(Some(logs.into()))
            }
            Command::Executor(executor::Command::StopAll) => {
                self.executor.stop_all();
                Ok(None)
            }
            Command::Scanner(scanner::Command::Scan {
                packets_per_beam,
                raster,
            }) => self.scan(*packets_per_beam, raster.as_ref()).await.map(Some),
            Command::Scanner(scanner::Command::Park) => {
                if self.scanner.park() {
                    Ok(None)
                } else {
                    Err(RunnerError::ParkFailed)
                }
            }
            Command::Interpolator(interpolate::Command::Fit {
                session,
                resolution,
                restarts,
            }) => {
                let session = match session {
                    Some(id) => self.store.load_session(id)?,
                    None => self.last_session.clone().ok_or(RunnerError::NoSession)?,
                };
                let mut config = self.interpolation.clone();
                if let Some(resolution) = resolution {
                    config.resolution = *resolution;
                }
                if let Some(restarts) = restarts {
                    config.restarts = *restarts;
                }
                let model = fit_blocking(session, config).await?;
                self.store.save_model(&model)?;
                Ok(Some(StepOutput::Model {
                    session_id: model.session_id,
                    score: model.score,
                }))
            }
        }
    }

    async fn scan(
        &mut self,
        packets_per_beam: Option<usize>,
        raster: Option<&RasterConfig>,
    ) -> RunnerResult<StepOutput> {
        let raster = Raster::new(raster.unwrap_or(&self.raster))?;
        let default_packets = self.scanner.config().packets_per_beam;
        if let Some(packets) = packets_per_beam {
            self.scanner.config_mut().packets_per_beam = packets;
        }
        let session = self.scanner.run(raster, &self.cancel).await;
        self.scanner.config_mut().packets_per_beam = default_packets;

        self.store.save_session(&session)?;
        let output = StepOutput::Session {
            id: session.session_id.clone(),
            samples: session.samples.len(),
            absent: session.absent_count(),
        };
        let state = session.state.clone();
        self.last_session = Some(session);
        match state {
            ScanState::Aborted {
                reason: reason @ AbortReason::Stopped { .. },
            } => Err(RunnerError::ScanStopped(reason)),
            ScanState::Aborted { reason } => Err(RunnerError::ScanAborted(reason)),
            _ => Ok(output),
        }
    }
}

/// Runs the CPU-bound fit off the async workers.
pub async fn fit_blocking(
    session: ScanSession,
    config: InterpolationConfig,
) -> RunnerResult<SpatialModel> {
    let model = tokio::task::spawn_blocking(move || interpolate::fit(&session, &config)).await??;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::{BeamformerAdapter, SimulatedBeamformer, SimulatedConfig};
    use crate::scanner::AcquisitionConfig;
    use crate::transport::encode_csi;
    use async_trait::async_trait;
    use num_complex::Complex32;
    use std::time::Duration;

    // Answers every exchange with a constant CSI frame.
    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&mut self, _payload: &[u8]) {}

        async fn receive(&mut self, _timeout: Duration) -> Option<Vec<u8>> {
            Some(encode_csi(&[Complex32::new(0.03, 0.04)]))
        }
    }

    fn runner(plan: &str, base: &std::path::Path) -> Runner<SimulatedBeamformer, EchoTransport> {
        let adapter = BeamformerAdapter::setup(SimulatedBeamformer::new(SimulatedConfig {
            gain_min_db: -7.5,
            gain_max_db: 10.5,
            board_count: 1,
        }))
        .unwrap();
        let acquisition = AcquisitionConfig {
            packets_per_beam: 1,
            settle: Duration::ZERO,
            pacing: Duration::ZERO,
            ..AcquisitionConfig::default()
        };
        Runner::new(
            Plan::from_str(plan).unwrap(),
            Scanner::new(adapter, EchoTransport, acquisition),
            SessionStore::new(base.to_path_buf()),
            RasterConfig::default(),
            InterpolationConfig {
                resolution: 8,
                restarts: 0,
                ..InterpolationConfig::default()
            },
            CancellationToken::new(),
        )
    }

    const SCAN_AND_FIT: &str = r#"
steps:
  - scanner:
      action: scan
      packets_per_beam: 2
      raster: { theta_range: [0, 10], phi_range: [0, 40], theta_step: 5, phi_step: 20 }
  - interpolator:
      action: fit
  - scanner:
      action: park
"#;

    #[tokio::test]
    async fn scan_then_fit_saves_session_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let log = runner(SCAN_AND_FIT, dir.path()).run().await.unwrap();

        assert_eq!(log.state, RunState::Completed);
        assert_eq!(log.step_results.len(), 3);
        assert!(log.step_results.iter().all(|r| r.success));

        let session_id = log.sessions().next().unwrap().to_string();
        assert_eq!(log.models().collect::<Vec<_>>(), vec![session_id.as_str()]);
        let store = SessionStore::new(dir.path().to_path_buf());
        let session = store.load_session(&session_id).unwrap();
        assert_eq!(session.samples.len(), 10);
        assert_eq!(session.absent_count(), 0);
        assert_eq!(session.state, ScanState::Completed);

        let model = store.load_model(&session_id).unwrap();
        assert_eq!(model.mean.shape(), (8, 8));

        let on_disk = ExecutionLog::load(
            &dir.path()
                .join("artifacts")
                .join(&log.run_id)
                .join("execution_log.yaml"),
        )
        .unwrap();
        assert_eq!(on_disk, log);
    }

    #[tokio::test]
    async fn fit_without_session_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let plan = "steps:\n  - interpolator: {action: fit}\n  - scanner: {action: park}\n";
        let log = runner(plan, dir.path()).run().await.unwrap();
        assert_eq!(log.state, RunState::Failed);
        assert_eq!(log.step_results.len(), 1);
        assert_eq!(log.step_results[0].error.as_deref(), Some("no session to fit"));
    }

    #[tokio::test]
    async fn failing_collaborator_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let plan = r#"
steps:
  - executor: {action: run_shell, cmd: "exit 2", on_fail: abort}
  - time: T+10s
    scanner: {action: park}
"#;
        let started = std::time::Instant::now();
        let log = runner(plan, dir.path()).run().await.unwrap();
        assert_eq!(log.state, RunState::Aborted);
        assert_eq!(log.step_results.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn oversized_step_raster_fails_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let plan = r#"
steps:
  - scanner:
      action: scan
      raster: { theta_range: [0, 45], phi_range: [0, 360], theta_step: 1.0e-9, phi_step: 1.0e-9 }
"#;
        let log = runner(plan, dir.path()).run().await.unwrap();
        assert_eq!(log.state, RunState::Failed);
        assert!(log.step_results[0].error.as_deref().unwrap().contains("exceeds"));
        assert!(SessionStore::new(dir.path().to_path_buf())
            .list_sessions()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_records_no_further_steps() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(SCAN_AND_FIT, dir.path());
        runner.cancel.cancel();
        let log = runner.run().await.unwrap();
        assert_eq!(log.state, RunState::Aborted);
        assert!(log.step_results.is_empty());
    }
}

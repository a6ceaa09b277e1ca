mod process;

use std::{
    io,
    process::Child,
    sync::{mpsc, Arc, Mutex, PoisonError},
};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::abort::AbortSignal;
use crate::storage::ProcessLogs;

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Start a collaborator process (CSI extractor, plotter, ...) in the background.
    RunShell {
        cmd: String,
        #[serde(default)]
        on_fail: OnFail,
    },
    StopAll,
}

pub struct TrackedProcess {
    step_index: usize,
    child: Arc<Mutex<Option<Child>>>,
}

#[cfg(test)]
impl TrackedProcess {
    pub fn is_running(&self) -> bool {
        lock(&self.child).is_some()
    }
}

/// Owns the background processes started by a plan run.
pub struct Executor {
    processes: Vec<TrackedProcess>,
    abort_tx: mpsc::Sender<AbortSignal>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(abort_tx: mpsc::Sender<AbortSignal>, cancel: CancellationToken) -> Self {
        Self {
            processes: Vec::new(),
            abort_tx,
            cancel,
        }
    }

    pub fn run_shell(
        &mut self,
        cmd: &str,
        step_index: usize,
        on_fail: OnFail,
        logs: &ProcessLogs,
    ) -> io::Result<()> {
        let process = process::spawn(
            cmd,
            step_index,
            on_fail,
            self.abort_tx.clone(),
            self.cancel.clone(),
            logs,
        )?;
        self.processes.push(process);
        Ok(())
    }

    #[cfg(test)]
    pub fn processes(&self) -> &[TrackedProcess] {
        &self.processes
    }

    /// Kills every process still running; returns how many were killed.
    pub fn stop_all(&mut self) -> usize {
        let mut killed = 0;
        for process in self.processes.drain(..) {
            let Some(mut child) = lock(&process.child).take() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill step {} process: {}", process.step_index, e);
                    } else {
                        killed += 1;
                    }
                    let _ = child.wait();
                }
            }
        }
        if killed > 0 {
            log::info!("Stopped {} background process(es)", killed);
        }
        killed
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(child: &Mutex<Option<Child>>) -> std::sync::MutexGuard<'_, Option<Child>> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

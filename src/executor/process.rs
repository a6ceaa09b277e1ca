use std::{
    fs::OpenOptions,
    io,
    path::Path,
    process::{Child, Command as StdCommand, Stdio},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use super::{lock, OnFail, TrackedProcess};
use crate::abort::AbortSignal;
use crate::storage::ProcessLogs;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn spawn(
    cmd: &str,
    step_index: usize,
    on_fail: OnFail,
    abort_tx: mpsc::Sender<AbortSignal>,
    cancel: CancellationToken,
    logs: &ProcessLogs,
) -> io::Result<TrackedProcess> {
    let open = |path: &Path| {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    };
    let stdout_file = open(&logs.stdout)?;
    let stderr_file = open(&logs.stderr)?;

    log::info!("Executing shell command (step {}): {}", step_index, cmd);

    let child = StdCommand::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()?;

    log::info!("Step {} spawned (PID: {})", step_index, child.id());

    let child = Arc::new(Mutex::new(Some(child)));
    let monitored = child.clone();
    let cmd = cmd.to_string();
    thread::spawn(move || monitor(monitored, step_index, on_fail, abort_tx, cancel, cmd));

    Ok(TrackedProcess { step_index, child })
}

fn monitor(
    child: Arc<Mutex<Option<Child>>>,
    step_index: usize,
    on_fail: OnFail,
    abort_tx: mpsc::Sender<AbortSignal>,
    cancel: CancellationToken,
    cmd: String,
) {
    loop {
        let result = {
            let mut guard = lock(&child);
            match &mut *guard {
                Some(process) => process.try_wait(),
                // Taken by stop_all.
                None => return,
            }
        };

        match result {
            Ok(Some(status)) => {
                lock(&child).take();
                let exit_code = status.code().unwrap_or(-1);
                log::info!("Step {} exited with code {}", step_index, exit_code);

                if exit_code != 0 && on_fail == OnFail::Abort {
                    log::error!("Step {} failed with on_fail: abort, aborting run", step_index);
                    cancel.cancel();
                    let _ = abort_tx.send(AbortSignal {
                        step: step_index,
                        reason: format!("Process failed with exit code {}: {}", exit_code, cmd),
                    });
                }
                return;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                log::error!("Step {} wait error: {}", step_index, e);
                return;
            }
        }
    }
}

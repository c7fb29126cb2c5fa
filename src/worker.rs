use crate::{
    config::AppConfig,
    fetch::Fetcher,
    install::{InstallReport, InstallRequest, Installer},
    progress::ProgressSink,
    workspace::Workspace,
};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug)]
pub enum InstallEvent {
    Progress(f32),
    Status(String),
    Completed { report: InstallReport },
    Failed { error: String },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("an install is already running")]
    AlreadyRunning,
    #[error("start install thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Runs installs on a background thread, one at a time.
pub struct InstallWorker {
    workspace: Workspace,
    fetcher: Arc<dyn Fetcher>,
    running: Arc<AtomicBool>,
}

impl InstallWorker {
    pub fn new(workspace: Workspace, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            workspace,
            fetcher,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts a run and returns its event stream. A start while another run
    /// is active is rejected, never queued.
    pub fn start(
        &self,
        request: InstallRequest,
        mut config: AppConfig,
    ) -> Result<Receiver<InstallEvent>, WorkerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerError::AlreadyRunning);
        }
        let guard = RunningGuard(self.running.clone());

        let (tx, rx) = mpsc::channel();
        let workspace = self.workspace.clone();
        let fetcher = self.fetcher.clone();
        thread::Builder::new()
            .name("install".to_string())
            .spawn(move || {
                let sink = ChannelSink { tx: tx.clone() };
                let result =
                    Installer::new(&workspace, fetcher.as_ref(), &sink).run(&request, &mut config);
                drop(guard);
                let event = match result {
                    Ok(report) => InstallEvent::Completed { report },
                    Err(err) => {
                        error!(error = %err, "install failed");
                        InstallEvent::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                let _ = tx.send(event);
            })?;
        Ok(rx)
    }
}

/// Clears the running flag when the run ends, including by panic or when
/// the thread never starts.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ChannelSink {
    tx: Sender<InstallEvent>,
}

impl ProgressSink for ChannelSink {
    fn progress(&self, percent: f32) {
        let _ = self.tx.send(InstallEvent::Progress(percent));
    }

    fn status(&self, text: String) {
        let _ = self.tx.send(InstallEvent::Status(text));
    }
}

#[cfg(test)]
impl InstallWorker {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

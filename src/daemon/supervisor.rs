use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// One supervised OS process, looked up by its logical slot name.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub name: String,
    pub command: Vec<String>,
    pub env_overrides: Vec<(String, String)>,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExitState {
    Running,
    Exited(i32),
}

struct ProcessEntry {
    info: ManagedProcess,
    exit_rx: watch::Receiver<ExitState>,
}

#[derive(Default)]
struct Inner {
    processes: HashMap<String, ProcessEntry>,
    last_exit_codes: HashMap<String, i32>,
}

/// Starts, tracks and terminates named long-running child processes.
///
/// At most one live process per name: starting a new one under an
/// occupied name stops the old one first. Each process runs in its own
/// process group so backend tools that spawn children can be signalled
/// as a tree, with stdout+stderr captured to a timestamped log file.
pub struct ProcessSupervisor {
    log_dir: PathBuf,
    inner: Arc<RwLock<Inner>>,
}

impl ProcessSupervisor {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub async fn running(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .processes
            .get(name)
            .map(|entry| *entry.exit_rx.borrow() == ExitState::Running)
            .unwrap_or(false)
    }

    pub async fn get(&self, name: &str) -> Option<ManagedProcess> {
        let inner = self.inner.read().await;
        inner.processes.get(name).map(|entry| entry.info.clone())
    }

    pub async fn last_exit_code(&self, name: &str) -> Option<i32> {
        let inner = self.inner.read().await;
        inner.last_exit_codes.get(name).copied()
    }

    /// Stable path pointing at the most recent session log for `name`.
    pub fn latest_log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }

    /// Launch `command` under `name`, replacing any existing process.
    ///
    /// A process that exits immediately is not an error here; callers
    /// probe the exit code shortly after to catch fast crashes.
    pub async fn start(
        &self,
        name: &str,
        command: &[String],
        env: Option<&[(String, String)]>,
    ) -> Result<ManagedProcess> {
        self.stop(name).await;

        let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
        let session_log = self.log_dir.join(format!("{name}-{ts}.log"));
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session_log)
            .map_err(|e| {
                AppError::backend_failed(format!("failed to open session log: {e}"))
                    .with_details(json!({"path": session_log.display().to_string()}))
            })?;
        let log_file_err = log_file.try_clone().map_err(|e| {
            AppError::backend_failed(format!("failed to clone session log handle: {e}"))
        })?;

        let (program, args) = command.split_first().ok_or_else(|| {
            AppError::backend_failed("empty command").with_details(json!({"name": name}))
        })?;

        let env_overrides: Vec<(String, String)> = env.map(|e| e.to_vec()).unwrap_or_default();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));
        for (key, value) in &env_overrides {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            AppError::backend_failed(format!("failed to launch {program}: {e}"))
                .with_details(json!({"command": command}))
        })?;
        let pid = child.id().unwrap_or_default();
        info!("Started process '{}' with PID {}", name, pid);

        let info = ManagedProcess {
            name: name.to_string(),
            command: command.to_vec(),
            env_overrides,
            pid,
        };

        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let monitor_inner = Arc::clone(&self.inner);
        let monitor_name = name.to_string();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    warn!("Wait failed for process '{}': {}", monitor_name, e);
                    -1
                }
            };
            debug!("Process '{}' exited with code {}", monitor_name, code);
            monitor_inner
                .write()
                .await
                .last_exit_codes
                .insert(monitor_name, code);
            let _ = exit_tx.send(ExitState::Exited(code));
        });

        // Best-effort stable pointer to the latest session log.
        let latest = self.latest_log_path(name);
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&latest);
            if let Some(target) = session_log.file_name() {
                let _ = std::os::unix::fs::symlink(target, &latest);
            }
        }

        let mut inner = self.inner.write().await;
        inner.processes.insert(
            name.to_string(),
            ProcessEntry {
                info: info.clone(),
                exit_rx,
            },
        );
        Ok(info)
    }

    /// Stop with the default graceful/kill timeouts.
    pub async fn stop(&self, name: &str) {
        self.stop_with_timeouts(name, DEFAULT_GRACEFUL_TIMEOUT, DEFAULT_KILL_TIMEOUT)
            .await;
    }

    /// Signal the process group with SIGTERM, escalate to SIGKILL, then
    /// give up silently. The bookkeeping entry is always removed.
    pub async fn stop_with_timeouts(&self, name: &str, graceful: Duration, kill: Duration) {
        let (pid, mut exit_rx) = {
            let mut inner = self.inner.write().await;
            let Some(entry) = inner.processes.get(name) else {
                return;
            };
            let pid = entry.info.pid;
            let exit_rx = entry.exit_rx.clone();
            if let ExitState::Exited(code) = *exit_rx.borrow() {
                inner.last_exit_codes.insert(name.to_string(), code);
                inner.processes.remove(name);
                return;
            }
            (pid, exit_rx)
        };

        debug!("Stopping process '{}' (PID {})", name, pid);
        signal_group(pid, libc::SIGTERM);
        let exited = tokio::time::timeout(graceful, wait_exited(&mut exit_rx))
            .await
            .is_ok();
        if !exited {
            warn!("Process '{}' did not stop in time, force killing", name);
            signal_group(pid, libc::SIGKILL);
            let _ = tokio::time::timeout(kill, wait_exited(&mut exit_rx)).await;
        }

        let mut inner = self.inner.write().await;
        if let ExitState::Exited(code) = *exit_rx.borrow() {
            inner.last_exit_codes.insert(name.to_string(), code);
        }
        inner.processes.remove(name);
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let inner = self.inner.read().await;
            inner.processes.keys().cloned().collect()
        };
        for name in names {
            self.stop(&name).await;
        }
    }

    /// Suspend until the tracked process for `name` exits and return its
    /// exit code. Returns None immediately if nothing is tracked — this
    /// never waits for a future start.
    pub async fn wait(&self, name: &str) -> Option<i32> {
        let mut exit_rx = {
            let inner = self.inner.read().await;
            inner.processes.get(name)?.exit_rx.clone()
        };
        Some(wait_exited(&mut exit_rx).await)
    }
}

async fn wait_exited(rx: &mut watch::Receiver<ExitState>) -> i32 {
    loop {
        if let ExitState::Exited(code) = *rx.borrow() {
            return code;
        }
        if rx.changed().await.is_err() {
            // Sender dropped; final value is whatever was last published.
            if let ExitState::Exited(code) = *rx.borrow() {
                return code;
            }
            return -1;
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| -s)).unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

/// SIGTERM/SIGKILL the whole process group; failures for an already-dead
/// group are expected and swallowed.
fn signal_group(pid: u32, signal: i32) {
    #[cfg(unix)]
    unsafe {
        if libc::killpg(pid as i32, signal) != 0 {
            let _ = libc::kill(pid as i32, signal);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}

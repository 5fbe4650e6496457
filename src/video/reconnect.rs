use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::daemon::state::{StateStore, SubsystemState};
use crate::daemon::supervisor::ProcessSupervisor;
use crate::error::Result;
use crate::video::types::{ReconnectPolicy, ReconnectState, ReconnectStatus};

pub type RestartFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type RestartFn = Arc<dyn Fn() -> RestartFuture + Send + Sync>;
pub type ExhaustedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ExhaustedFn = Arc<dyn Fn(Option<i32>, u32) -> ExhaustedFuture + Send + Sync>;

/// Watches the supervised bridge process and restarts it after an
/// unexpected exit, up to a bounded attempt count with a fixed backoff
/// between attempts.
///
/// The watch is the only long-lived background task of the video
/// subsystem; it is cancelled immediately on deliberate stop/reset, and
/// arming a new watch cancels any predecessor. The subsystem-state
/// re-check after every sleep is what prevents reconnecting a stream the
/// user stopped on purpose.
pub struct ReconnectController {
    state_store: Arc<StateStore>,
    supervisor: Arc<ProcessSupervisor>,
    proc_name: String,
    policy: Mutex<ReconnectPolicy>,
    status: Arc<Mutex<ReconnectStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectController {
    pub fn new(
        state_store: Arc<StateStore>,
        supervisor: Arc<ProcessSupervisor>,
        proc_name: impl Into<String>,
    ) -> Self {
        let policy = ReconnectPolicy::default().normalized();
        Self {
            state_store,
            supervisor,
            proc_name: proc_name.into(),
            policy: Mutex::new(policy),
            status: Arc::new(Mutex::new(ReconnectStatus::from_policy(policy))),
            task: Mutex::new(None),
        }
    }

    /// Install a fresh policy and reset live status from it.
    pub fn configure(&self, policy: ReconnectPolicy) {
        let normalized = policy.normalized();
        *self.policy.lock().expect("reconnect policy lock poisoned") = normalized;
        *self.status.lock().expect("reconnect status lock poisoned") =
            ReconnectStatus::from_policy(normalized);
    }

    pub fn runtime_status(&self) -> ReconnectStatus {
        self.status.lock().expect("reconnect status lock poisoned").clone()
    }

    /// Cancel any active watch immediately and park the status under the
    /// given terminal label.
    pub fn cancel(&self, state: ReconnectState) {
        if let Some(task) = self.task.lock().expect("reconnect task lock poisoned").take() {
            task.abort();
        }
        let mut status = self.status.lock().expect("reconnect status lock poisoned");
        status.state = state;
        status.attempt = 0;
        status.next_retry_in_ms = None;
    }

    /// Arm the watch. Only one watch task is active per controller;
    /// arming again cancels the previous one first.
    pub fn start_watch(&self, on_restart: RestartFn, on_exhausted: ExhaustedFn) {
        let mut slot = self.task.lock().expect("reconnect task lock poisoned");
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let policy = *self.policy.lock().expect("reconnect policy lock poisoned");
        let status = Arc::clone(&self.status);
        let state_store = Arc::clone(&self.state_store);
        let supervisor = Arc::clone(&self.supervisor);
        let proc_name = self.proc_name.clone();

        *slot = Some(tokio::spawn(async move {
            loop {
                let exit_code = supervisor.wait(&proc_name).await;

                if !policy.enabled {
                    return;
                }

                {
                    let mut s = status.lock().expect("reconnect status lock poisoned");
                    s.enabled = true;
                    s.max_attempts = policy.max_attempts;
                    s.backoff_ms = policy.backoff_ms;
                    s.last_exit_code = exit_code;
                    s.state = ReconnectState::Exited;
                    s.attempt = 0;
                    s.next_retry_in_ms = None;
                }

                // A deliberate stop moves the subsystem out of RUNNING
                // before (or while) we wake up.
                if state_store.video_state().await != SubsystemState::Running {
                    debug!("Reconnect watch: video no longer RUNNING, standing down");
                    return;
                }
                info!(
                    "Process '{}' exited unexpectedly (code {:?}), reconnecting",
                    proc_name, exit_code
                );

                let mut restarted = false;
                for attempt in 1..=policy.max_attempts {
                    {
                        let mut s = status.lock().expect("reconnect status lock poisoned");
                        s.attempt = attempt;
                        s.state = ReconnectState::Waiting;
                        s.next_retry_in_ms = Some(policy.backoff_ms);
                    }
                    tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
                    status
                        .lock()
                        .expect("reconnect status lock poisoned")
                        .next_retry_in_ms = Some(0);

                    if state_store.video_state().await != SubsystemState::Running {
                        debug!("Reconnect watch: stopped during backoff, standing down");
                        return;
                    }

                    status.lock().expect("reconnect status lock poisoned").state =
                        ReconnectState::Restarting;
                    let _ = state_store.transition_video(SubsystemState::Starting).await;

                    match on_restart().await {
                        Ok(()) => {
                            let mut s = status.lock().expect("reconnect status lock poisoned");
                            s.state = ReconnectState::Running;
                            s.attempt = 0;
                            s.next_retry_in_ms = None;
                            restarted = true;
                            info!("Reconnect attempt {} succeeded", attempt);
                            break;
                        }
                        Err(err) => {
                            warn!("Reconnect attempt {} failed: {}", attempt, err);
                            // Back to RUNNING so the next attempt may try
                            // the STARTING transition again.
                            let _ = state_store.transition_video(SubsystemState::Running).await;
                            status.lock().expect("reconnect status lock poisoned").state =
                                ReconnectState::Failed;
                        }
                    }
                }

                if !restarted {
                    {
                        let mut s = status.lock().expect("reconnect status lock poisoned");
                        s.state = ReconnectState::Exhausted;
                        s.next_retry_in_ms = None;
                    }
                    on_exhausted(exit_code, policy.max_attempts).await;
                    return;
                }
            }
        }));
    }
}

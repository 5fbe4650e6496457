use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::audio::AudioManager;
use crate::backends::{SourceInfo, VideoBackend};
use crate::daemon::state::{StateStore, SubsystemState};
use crate::daemon::supervisor::ProcessSupervisor;
use crate::error::{ErrorKind, Result};
use crate::helper::HelperClient;
use crate::integrations::V4l2Loopback;
use crate::video::device_reset::DeviceResetService;
use crate::video::reconnect::{ExhaustedFn, ReconnectController, RestartFn};
use crate::video::session::{VideoSessionService, VIDEO_PROC_NAME};
use crate::video::types::{
    CameraFacing, ReconnectPolicy, ReconnectState, ReconnectStatus, VideoSource,
    VideoStartOptions, VideoStartOutcome, VideoStopOutcome, VALID_ROTATIONS,
};

/// How long to let the backend process release the device node after a
/// stop before reloading the loopback module.
const POST_STOP_SETTLE: Duration = Duration::from_secs(2);

/// Caller-facing start parameters; unset fields reuse the last values.
#[derive(Debug, Clone, Default)]
pub struct VideoStartRequest {
    pub serial: Option<String>,
    pub camera_facing: Option<CameraFacing>,
    pub camera_rotation: Option<u16>,
    pub preview_window: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPointers {
    pub video_android: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoRuntimeStatus {
    pub active_source: Option<VideoSource>,
    pub active_process: Option<String>,
    pub last_exit_code: Option<i32>,
    pub reconnect: ReconnectStatus,
    pub log_pointers: LogPointers,
}

#[derive(Debug, Clone, Copy)]
struct CameraOptions {
    facing: CameraFacing,
    rotation: u16,
    preview: bool,
}

/// The only video entry point for callers. start/stop/reset are
/// mutually exclusive high-level operations: interleaving them would
/// corrupt the active-source and reconnect bookkeeping, so everything
/// serializes through one mutex even though each sub-step is async.
pub struct VideoManager {
    core: Arc<VideoCore>,
}

/// Shared guts of the manager; the reconnect watch holds a clone so it
/// can drive restarts through the same lock as user calls.
struct VideoCore {
    state_store: Arc<StateStore>,
    supervisor: Arc<ProcessSupervisor>,
    session: VideoSessionService,
    device_reset: DeviceResetService,
    reconnect: ReconnectController,
    lock: Mutex<()>,
    remembered: std::sync::Mutex<CameraOptions>,
    reconnect_policy: ReconnectPolicy,
    preset: String,
    settle_delay: Duration,
}

impl VideoManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_store: Arc<StateStore>,
        supervisor: Arc<ProcessSupervisor>,
        backend: Arc<dyn VideoBackend>,
        helper: Arc<dyn HelperClient>,
        v4l2: Arc<V4l2Loopback>,
        audio_manager: Option<Arc<AudioManager>>,
        reconnect_policy: ReconnectPolicy,
        preset: impl Into<String>,
    ) -> Self {
        let session = VideoSessionService::new(
            Arc::clone(&state_store),
            backend,
            Arc::clone(&supervisor),
            Arc::clone(&v4l2),
            audio_manager,
        );
        let device_reset = DeviceResetService::new(helper, v4l2);
        let reconnect = ReconnectController::new(
            Arc::clone(&state_store),
            Arc::clone(&supervisor),
            VIDEO_PROC_NAME,
        );
        Self {
            core: Arc::new(VideoCore {
                state_store,
                supervisor,
                session,
                device_reset,
                reconnect,
                lock: Mutex::new(()),
                remembered: std::sync::Mutex::new(CameraOptions {
                    facing: CameraFacing::Front,
                    rotation: 0,
                    preview: false,
                }),
                reconnect_policy: reconnect_policy.normalized(),
                preset: preset.into(),
                settle_delay: POST_STOP_SETTLE,
            }),
        }
    }

    #[cfg(test)]
    fn set_settle_delay(&mut self, delay: Duration) {
        Arc::get_mut(&mut self.core)
            .expect("settle delay must be set before the manager is shared")
            .settle_delay = delay;
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        self.core.session.list_sources().await
    }

    pub async fn runtime_status(&self) -> VideoRuntimeStatus {
        self.core.runtime_status().await
    }

    pub async fn start(&self, request: VideoStartRequest) -> Result<VideoStartOutcome> {
        VideoCore::start(&self.core, request, false).await
    }

    pub async fn stop(&self) -> Result<VideoStopOutcome> {
        self.core.stop().await
    }

    pub async fn stop_reconnect(&self) -> Value {
        self.core.stop_reconnect().await
    }

    pub async fn reset(&self, force: bool) -> Result<Value> {
        self.core.reset(force).await
    }
}

impl VideoCore {
    async fn runtime_status(&self) -> VideoRuntimeStatus {
        VideoRuntimeStatus {
            active_source: self.session.active_source(),
            active_process: self.session.active_process(),
            last_exit_code: self.supervisor.last_exit_code(VIDEO_PROC_NAME).await,
            reconnect: self.reconnect.runtime_status(),
            log_pointers: LogPointers {
                video_android: self
                    .supervisor
                    .latest_log_path(VIDEO_PROC_NAME)
                    .display()
                    .to_string(),
            },
        }
    }

    async fn start(
        core: &Arc<VideoCore>,
        request: VideoStartRequest,
        from_watch: bool,
    ) -> Result<VideoStartOutcome> {
        let _guard = core.lock.lock().await;

        let resolved = {
            let remembered = core.remembered.lock().expect("camera options lock poisoned");
            CameraOptions {
                facing: request.camera_facing.unwrap_or(remembered.facing),
                rotation: request
                    .camera_rotation
                    .filter(|r| VALID_ROTATIONS.contains(r))
                    .unwrap_or(remembered.rotation),
                preview: request.preview_window.unwrap_or(remembered.preview),
            }
        };

        core.reconnect.configure(core.reconnect_policy);
        core.device_reset.ensure_ready().await?;

        let outcome = core
            .session
            .start(&VideoStartOptions {
                serial: request.serial,
                camera_facing: resolved.facing,
                camera_rotation: resolved.rotation,
                preview_window: resolved.preview,
                enable_audio: true,
                preset: core.preset.clone(),
            })
            .await?;

        *core.remembered.lock().expect("camera options lock poisoned") = resolved;

        // Only a user-initiated start re-arms the watch; a start driven
        // by the watch itself must not cancel its own task.
        if !from_watch {
            Self::arm_watch(core);
        }

        Ok(outcome)
    }

    fn arm_watch(core: &Arc<VideoCore>) {
        let restart_core = Arc::clone(core);
        let on_restart: RestartFn = Arc::new(move || {
            let core = Arc::clone(&restart_core);
            Box::pin(async move {
                let serial = core.session.active_source().map(|s| s.serial);
                let remembered = *core.remembered.lock().expect("camera options lock poisoned");
                VideoCore::start(
                    &core,
                    VideoStartRequest {
                        serial,
                        camera_facing: Some(remembered.facing),
                        camera_rotation: Some(remembered.rotation),
                        preview_window: Some(remembered.preview),
                    },
                    true,
                )
                .await
                .map(|_| ())
            })
        });

        let state_store = Arc::clone(&core.state_store);
        let on_exhausted: ExhaustedFn = Arc::new(move |exit_code, attempts| {
            let state_store = Arc::clone(&state_store);
            Box::pin(async move {
                state_store
                    .set_video_error(
                        ErrorKind::BackendFailed.code(),
                        "video backend exited and reconnect attempts exhausted",
                        json!({"returncode": exit_code, "attempts": attempts}),
                    )
                    .await;
            })
        });

        core.reconnect.start_watch(on_restart, on_exhausted);
    }

    async fn stop(&self) -> Result<VideoStopOutcome> {
        let _guard = self.lock.lock().await;

        self.reconnect.cancel(ReconnectState::Idle);
        let mut outcome = self.session.stop().await?;

        // Let the backend release the device node before reloading it.
        tokio::time::sleep(self.settle_delay).await;
        outcome.post_stop_reset = Some(self.device_reset.best_effort_reload_after_stop().await);
        Ok(outcome)
    }

    async fn stop_reconnect(&self) -> Value {
        let _guard = self.lock.lock().await;
        self.reconnect.cancel(ReconnectState::Stopped);
        json!({"stopped": true, "reconnect": self.reconnect.runtime_status()})
    }

    /// Recover a wedged device. Stops any tracked process first, but
    /// reloads the module even when nothing is running so a crashed,
    /// no-longer-tracked process can be cleaned up after too.
    async fn reset(&self, force: bool) -> Result<Value> {
        let _guard = self.lock.lock().await;

        if self.supervisor.running(VIDEO_PROC_NAME).await {
            info!("Reset requested while video process is running; stopping it first");
            self.reconnect.cancel(ReconnectState::Idle);

            if self.state_store.video_state().await != SubsystemState::Stopping {
                let _ = self
                    .state_store
                    .transition_video(SubsystemState::Stopping)
                    .await;
            }

            self.supervisor.stop(VIDEO_PROC_NAME).await;

            if self.state_store.video_state().await != SubsystemState::Stopped {
                let _ = self
                    .state_store
                    .transition_video(SubsystemState::Stopped)
                    .await;
            }

            self.session.clear_active();
        }

        self.device_reset.reset(force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LaunchSpec;
    use crate::error::AppError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Replays scripted shell commands, one per session start; can start
    /// failing device selection to simulate an unplugged phone.
    struct ScriptedBackend {
        scripts: std::sync::Mutex<Vec<String>>,
        fallback: String,
        fail_select: AtomicBool,
        builds: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(scripts: &[&str], fallback: &str) -> Arc<Self> {
            Arc::new(Self {
                scripts: std::sync::Mutex::new(
                    scripts.iter().rev().map(|s| s.to_string()).collect(),
                ),
                fallback: fallback.to_string(),
                fail_select: AtomicBool::new(false),
                builds: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VideoBackend for ScriptedBackend {
        async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
            Ok(vec![SourceInfo {
                serial: "ABC123".to_string(),
                state: "device".to_string(),
            }])
        }

        async fn select_default_source(
            &self,
            preferred_serial: Option<&str>,
            _preferred_transport: Option<&str>,
        ) -> Result<SourceInfo> {
            if self.fail_select.load(Ordering::SeqCst) {
                return Err(
                    AppError::backend_failed("no authorized Android device available")
                        .with_details(json!({"devices": []})),
                );
            }
            Ok(SourceInfo {
                serial: preferred_serial.unwrap_or("ABC123").to_string(),
                state: "device".to_string(),
            })
        }

        fn build_start_command(&self, _spec: &LaunchSpec) -> Result<Vec<String>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| self.fallback.clone());
            Ok(vec!["/bin/sh".to_string(), "-c".to_string(), script])
        }
    }

    struct FakeHelper {
        busy_on_reload: AtomicBool,
        reload_calls: AtomicUsize,
    }

    impl FakeHelper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                busy_on_reload: AtomicBool::new(false),
                reload_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl crate::helper::HelperClient for FakeHelper {
        async fn call(&self, action: &str, _params: Value) -> Result<Value> {
            match action {
                "v4l2.status" => Ok(json!({"requires_reload": false})),
                "v4l2.reload" => {
                    self.reload_calls.fetch_add(1, Ordering::SeqCst);
                    if self.busy_on_reload.load(Ordering::SeqCst) {
                        Err(AppError::busy_device("device busy"))
                    } else {
                        Ok(json!({"status_after": {"loaded": true}}))
                    }
                }
                _ => Ok(json!({})),
            }
        }
    }

    struct Fixture {
        manager: VideoManager,
        helper: Arc<FakeHelper>,
        state_store: Arc<StateStore>,
        supervisor: Arc<ProcessSupervisor>,
        _dir: tempfile::TempDir,
    }

    fn fixture(backend: Arc<dyn VideoBackend>, policy: ReconnectPolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state_store = Arc::new(StateStore::new());
        let supervisor = Arc::new(ProcessSupervisor::new(dir.path().to_path_buf()));
        let helper = FakeHelper::new();
        let mut manager = VideoManager::new(
            Arc::clone(&state_store),
            Arc::clone(&supervisor),
            backend,
            helper.clone() as Arc<dyn HelperClient>,
            Arc::new(V4l2Loopback::new(10)),
            None,
            policy,
            "balanced",
        );
        manager.set_settle_delay(Duration::from_millis(20));
        Fixture {
            manager,
            helper,
            state_store,
            supervisor,
            _dir: dir,
        }
    }

    async fn wait_for_reconnect_state(
        manager: &VideoManager,
        want: ReconnectState,
        timeout_ms: u64,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while manager.core.reconnect.runtime_status().state != want {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "reconnect never reached {want:?}; status = {:?}",
                    manager.core.reconnect.runtime_status()
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn start_reaches_running_with_status() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );

        let outcome = fx
            .manager
            .start(VideoStartRequest {
                serial: Some("ABC123".to_string()),
                camera_facing: Some(CameraFacing::Back),
                preview_window: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.state, "RUNNING");
        assert_eq!(
            outcome.source,
            Some(VideoSource {
                serial: "ABC123".to_string(),
                camera_facing: CameraFacing::Back,
                camera_rotation: 0,
                preview_window: true,
            })
        );

        let status = fx.manager.runtime_status().await;
        assert_eq!(status.active_process.as_deref(), Some(VIDEO_PROC_NAME));
        assert!(status.log_pointers.video_android.ends_with("video-android.log"));

        fx.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_idempotent_and_single_process() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();
        let pid = fx.supervisor.get(VIDEO_PROC_NAME).await.unwrap().pid;

        let second = fx.manager.start(VideoStartRequest::default()).await.unwrap();
        assert!(second.already_running);
        assert_eq!(fx.supervisor.get(VIDEO_PROC_NAME).await.unwrap().pid, pid);

        fx.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_twice_returns_already_stopped() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();

        let first = fx.manager.stop().await.unwrap();
        assert!(!first.already_stopped);
        assert!(first.post_stop_reset.is_some());

        let second = fx.manager.stop().await.unwrap();
        assert!(second.already_stopped);
        assert_eq!(fx.state_store.video_state().await, SubsystemState::Stopped);
    }

    #[tokio::test]
    async fn reconnect_restarts_with_same_source() {
        // First session dies after ~300ms; the replacement stays up.
        let fx = fixture(
            ScriptedBackend::new(&["sleep 0.3; exit 1"], "sleep 30"),
            ReconnectPolicy {
                enabled: true,
                max_attempts: 3,
                backoff_ms: 100,
            },
        );
        fx.manager
            .start(VideoStartRequest {
                serial: Some("ABC123".to_string()),
                camera_facing: Some(CameraFacing::Back),
                ..Default::default()
            })
            .await
            .unwrap();

        wait_for_reconnect_state(&fx.manager, ReconnectState::Running, 5000).await;

        assert_eq!(fx.state_store.video_state().await, SubsystemState::Running);
        let status = fx.manager.runtime_status().await;
        assert_eq!(status.last_exit_code, Some(1));
        assert_eq!(status.active_source.unwrap().serial, "ABC123");

        fx.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_exhaustion_records_terminal_error() {
        // Session starts once, the process dies, and the phone is gone
        // for every restart attempt.
        let backend = ScriptedBackend::new(&["sleep 0.3; exit 1"], "sleep 30");
        let fx = fixture(
            Arc::clone(&backend) as Arc<dyn VideoBackend>,
            ReconnectPolicy {
                enabled: true,
                max_attempts: 2,
                backoff_ms: 100,
            },
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();
        backend.fail_select.store(true, Ordering::SeqCst);

        wait_for_reconnect_state(&fx.manager, ReconnectState::Exhausted, 10000).await;

        let snap = fx.state_store.snapshot().await;
        assert_eq!(snap.video.state, SubsystemState::Error);
        let last = snap.video.last_error.unwrap();
        assert_eq!(last.code, "E_BACKEND_FAILED");
        assert_eq!(last.details["attempts"], 2);
        assert_eq!(last.details["returncode"], 1);
    }

    #[tokio::test]
    async fn stop_during_reconnect_wait_ends_stopped() {
        let fx = fixture(
            ScriptedBackend::new(&["sleep 0.3; exit 1"], "sleep 30"),
            ReconnectPolicy {
                enabled: true,
                max_attempts: 5,
                backoff_ms: 2000,
            },
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();

        wait_for_reconnect_state(&fx.manager, ReconnectState::Waiting, 5000).await;

        fx.manager.stop().await.unwrap();
        assert_eq!(fx.state_store.video_state().await, SubsystemState::Stopped);
        assert_eq!(
            fx.manager.core.reconnect.runtime_status().state,
            ReconnectState::Idle
        );

        // No restart happens after the deliberate stop.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!fx.supervisor.running(VIDEO_PROC_NAME).await);
        assert_eq!(fx.state_store.video_state().await, SubsystemState::Stopped);
    }

    #[tokio::test]
    async fn reset_stops_process_and_reloads_device() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();

        let result = fx.manager.reset(false).await.unwrap();
        assert_eq!(result["state"], "RESET");
        assert!(!fx.supervisor.running(VIDEO_PROC_NAME).await);
        assert_eq!(fx.state_store.video_state().await, SubsystemState::Stopped);
        assert!(fx.manager.core.session.active_source().is_none());
    }

    #[tokio::test]
    async fn reset_works_with_nothing_running() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        let result = fx.manager.reset(true).await.unwrap();
        assert_eq!(result["state"], "RESET");
        assert_eq!(fx.helper.reload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_busy_device_is_enriched() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        fx.helper.busy_on_reload.store(true, Ordering::SeqCst);

        let err = fx.manager.reset(false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusyDevice);
        assert!(err.details["blocker_pids"].is_array());
        assert!(!err.details["hint"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_reconnect_parks_the_watch() {
        let fx = fixture(
            ScriptedBackend::new(&[], "sleep 30"),
            ReconnectPolicy::default(),
        );
        fx.manager.start(VideoStartRequest::default()).await.unwrap();

        let result = fx.manager.stop_reconnect().await;
        assert_eq!(result["stopped"], true);
        assert_eq!(result["reconnect"]["state"], "stopped");

        fx.manager.stop().await.unwrap();
    }
}

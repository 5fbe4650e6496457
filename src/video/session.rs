use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::AudioManager;
use crate::backends::{LaunchSpec, SourceInfo, VideoBackend};
use crate::daemon::state::{StateStore, SubsystemState};
use crate::daemon::supervisor::ProcessSupervisor;
use crate::error::{AppError, ErrorKind, Result};
use crate::integrations::V4l2Loopback;
use crate::video::types::{VideoSource, VideoStartOptions, VideoStartOutcome, VideoStopOutcome};

/// Supervisor slot name for the android bridge process.
pub const VIDEO_PROC_NAME: &str = "video-android";

/// How long to let the bridge process live before declaring the launch
/// good; catches fast-crash failures without a full timeout.
const FAST_CRASH_PROBE: Duration = Duration::from_millis(200);

#[derive(Default)]
struct ActiveSession {
    source: Option<VideoSource>,
    process_name: Option<String>,
}

/// Start/stop protocol for one android-camera session.
///
/// Stateless between calls except for the active-source bookkeeping it
/// owns. Serialization against concurrent starts/stops is the video
/// manager's job.
pub struct VideoSessionService {
    state_store: Arc<StateStore>,
    backend: Arc<dyn VideoBackend>,
    supervisor: Arc<ProcessSupervisor>,
    v4l2: Arc<V4l2Loopback>,
    audio_manager: Option<Arc<AudioManager>>,
    active: std::sync::Mutex<ActiveSession>,
}

impl VideoSessionService {
    pub fn new(
        state_store: Arc<StateStore>,
        backend: Arc<dyn VideoBackend>,
        supervisor: Arc<ProcessSupervisor>,
        v4l2: Arc<V4l2Loopback>,
        audio_manager: Option<Arc<AudioManager>>,
    ) -> Self {
        Self {
            state_store,
            backend,
            supervisor,
            v4l2,
            audio_manager,
            active: std::sync::Mutex::new(ActiveSession::default()),
        }
    }

    pub fn active_source(&self) -> Option<VideoSource> {
        self.active.lock().expect("active session lock poisoned").source.clone()
    }

    pub fn active_process(&self) -> Option<String> {
        self.active
            .lock()
            .expect("active session lock poisoned")
            .process_name
            .clone()
    }

    pub fn clear_active(&self) {
        let mut active = self.active.lock().expect("active session lock poisoned");
        active.source = None;
        active.process_name = None;
    }

    fn set_active(&self, source: VideoSource) {
        let mut active = self.active.lock().expect("active session lock poisoned");
        active.source = Some(source);
        active.process_name = Some(VIDEO_PROC_NAME.to_string());
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        self.backend.list_sources().await
    }

    pub async fn start(&self, options: &VideoStartOptions) -> Result<VideoStartOutcome> {
        let current = self.state_store.video_state().await;
        let running = self.supervisor.running(VIDEO_PROC_NAME).await;

        if matches!(current, SubsystemState::Running | SubsystemState::Starting) && running {
            return Ok(VideoStartOutcome {
                state: "RUNNING",
                already_running: true,
                source: self.active_source(),
                audio: None,
            });
        }

        if current == SubsystemState::Stopping && running {
            return Err(AppError::conflict("video is stopping; retry in a moment")
                .with_details(json!({"state": current.as_str()})));
        }

        // Bookkeeping claims a live session but the process died without
        // being observed; resynchronize before starting fresh.
        if !running && matches!(current, SubsystemState::Running | SubsystemState::Starting) {
            self.state_store.transition_video(SubsystemState::Stopping).await?;
            self.state_store.transition_video(SubsystemState::Stopped).await?;
            self.clear_active();
        }

        if let Err(err) = self.state_store.transition_video(SubsystemState::Starting).await {
            if err.kind == ErrorKind::InvalidTransition {
                return Err(AppError::conflict("video start is not allowed in current state")
                    .with_details(json!({"state": current.as_str()})));
            }
            return Err(err);
        }

        let source = self
            .backend
            .select_default_source(options.serial.as_deref(), None)
            .await?;
        let command = self.backend.build_start_command(&LaunchSpec {
            serial: source.serial.clone(),
            sink_path: self.v4l2.device_path().display().to_string(),
            preset: options.preset.clone(),
            camera_facing: Some(options.camera_facing),
            camera_rotation: Some(options.camera_rotation),
            preview_window: options.preview_window,
            enable_audio: options.enable_audio,
        })?;

        self.supervisor.start(VIDEO_PROC_NAME, &command, None).await?;
        tokio::time::sleep(FAST_CRASH_PROBE).await;
        if !self.supervisor.running(VIDEO_PROC_NAME).await {
            let returncode = self.supervisor.last_exit_code(VIDEO_PROC_NAME).await;
            self.state_store
                .set_video_error(
                    ErrorKind::BackendFailed.code(),
                    "android backend exited immediately",
                    json!({"returncode": returncode, "command": command}),
                )
                .await;
            return Err(AppError::conflict("failed to start android backend")
                .with_details(json!({"returncode": returncode})));
        }

        self.state_store.transition_video(SubsystemState::Running).await?;
        self.set_active(VideoSource {
            serial: source.serial.clone(),
            camera_facing: options.camera_facing,
            camera_rotation: options.camera_rotation,
            preview_window: options.preview_window,
        });
        info!("Video session running on {}", source.serial);

        // Audio bridging is coupled but non-fatal: a failure is reported
        // in the result, never as a failed video start.
        let audio = match self.audio_manager {
            Some(ref audio_manager) => Some(match audio_manager.start("pipewire").await {
                Ok(result) => result,
                Err(err) => {
                    warn!("Audio bridge failed during video start: {}", err);
                    json!({
                        "state": "ERROR",
                        "already_running": false,
                        "backend": "pipewire",
                        "error": err.to_string(),
                    })
                }
            }),
            None => None,
        };

        Ok(VideoStartOutcome {
            state: "RUNNING",
            already_running: false,
            source: self.active_source(),
            audio,
        })
    }

    pub async fn stop(&self) -> Result<VideoStopOutcome> {
        let current = self.state_store.video_state().await;
        let running = self.supervisor.running(VIDEO_PROC_NAME).await;

        if current == SubsystemState::Stopped && !running {
            return Ok(VideoStopOutcome {
                state: "STOPPED",
                already_stopped: true,
                audio: None,
                post_stop_reset: None,
            });
        }

        if current != SubsystemState::Stopping {
            self.state_store.transition_video(SubsystemState::Stopping).await?;
        }

        self.supervisor.stop(VIDEO_PROC_NAME).await;
        self.state_store.transition_video(SubsystemState::Stopped).await?;
        self.clear_active();

        let audio = match self.audio_manager {
            Some(ref audio_manager) => Some(match audio_manager.stop().await {
                Ok(result) => result,
                Err(err) => {
                    warn!("Audio bridge stop failed during video stop: {}", err);
                    json!({
                        "state": "ERROR",
                        "already_stopped": false,
                        "error": err.to_string(),
                    })
                }
            }),
            None => None,
        };

        Ok(VideoStopOutcome {
            state: "STOPPED",
            already_stopped: false,
            audio,
            post_stop_reset: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct FakeBackend {
        pub script: String,
        pub fail_select: bool,
        pub starts: AtomicUsize,
    }

    impl FakeBackend {
        pub fn with_script(script: &str) -> Self {
            Self {
                script: script.to_string(),
                fail_select: false,
                starts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VideoBackend for FakeBackend {
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
            if self.fail_select {
                return Err(AppError::backend_failed("no authorized Android device available")
                    .with_details(json!({"devices": []})));
            }
            Ok(SourceInfo {
                serial: preferred_serial.unwrap_or("ABC123").to_string(),
                state: "device".to_string(),
            })
        }

        fn build_start_command(&self, _spec: &LaunchSpec) -> Result<Vec<String>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                self.script.clone(),
            ])
        }
    }

    fn service_with(backend: Arc<dyn VideoBackend>) -> (VideoSessionService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = VideoSessionService::new(
            Arc::new(StateStore::new()),
            backend,
            Arc::new(ProcessSupervisor::new(dir.path().to_path_buf())),
            Arc::new(V4l2Loopback::new(10)),
            None,
        );
        (service, dir)
    }

    #[tokio::test]
    async fn fresh_start_reaches_running_with_active_source() {
        let (service, _dir) = service_with(Arc::new(FakeBackend::with_script("sleep 30")));
        let options = VideoStartOptions {
            serial: Some("ABC123".to_string()),
            camera_facing: crate::video::CameraFacing::Back,
            preview_window: true,
            ..Default::default()
        };

        let outcome = service.start(&options).await.unwrap();
        assert_eq!(outcome.state, "RUNNING");
        assert!(!outcome.already_running);
        assert_eq!(
            outcome.source,
            Some(VideoSource {
                serial: "ABC123".to_string(),
                camera_facing: crate::video::CameraFacing::Back,
                camera_rotation: 0,
                preview_window: true,
            })
        );
        assert_eq!(service.state_store.video_state().await, SubsystemState::Running);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_idempotent() {
        let backend = Arc::new(FakeBackend::with_script("sleep 30"));
        let (service, _dir) = service_with(backend.clone());
        let options = VideoStartOptions::default();

        service.start(&options).await.unwrap();
        let second = service.start(&options).await.unwrap();
        assert!(second.already_running);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_while_stopping_is_retryable_conflict() {
        let (service, _dir) = service_with(Arc::new(FakeBackend::with_script("sleep 30")));
        service.start(&VideoStartOptions::default()).await.unwrap();
        service
            .state_store
            .transition_video(SubsystemState::Stopping)
            .await
            .unwrap();

        let err = service.start(&VideoStartOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.retryable);

        // Let the teardown finish so the supervisor slot is released.
        service.supervisor.stop(VIDEO_PROC_NAME).await;
    }

    #[tokio::test]
    async fn fast_crash_fails_start_and_records_error() {
        let (service, _dir) = service_with(Arc::new(FakeBackend::with_script("exit 3")));
        let err = service.start(&VideoStartOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.details["returncode"], 3);

        let snap = service.state_store.snapshot().await;
        assert_eq!(snap.video.state, SubsystemState::Error);
        let last = snap.video.last_error.unwrap();
        assert_eq!(last.code, "E_BACKEND_FAILED");
        assert_eq!(last.details["returncode"], 3);
    }

    #[tokio::test]
    async fn dead_process_with_stale_running_state_resyncs() {
        let (service, _dir) = service_with(Arc::new(FakeBackend::with_script("sleep 0.5")));
        service.start(&VideoStartOptions::default()).await.unwrap();
        assert_eq!(service.supervisor.wait(VIDEO_PROC_NAME).await, Some(0));
        assert_eq!(service.state_store.video_state().await, SubsystemState::Running);

        // Still RUNNING on paper; a new start resyncs and proceeds.
        let outcome = service.start(&VideoStartOptions::default()).await.unwrap();
        assert!(!outcome.already_running);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (service, _dir) = service_with(Arc::new(FakeBackend::with_script("sleep 30")));
        let first = service.stop().await.unwrap();
        assert!(first.already_stopped);

        service.start(&VideoStartOptions::default()).await.unwrap();
        let second = service.stop().await.unwrap();
        assert!(!second.already_stopped);
        let third = service.stop().await.unwrap();
        assert!(third.already_stopped);
        assert!(service.active_source().is_none());
    }

    #[tokio::test]
    async fn select_failure_leaves_starting_state_error_free() {
        let backend = Arc::new(FakeBackend {
            script: "sleep 30".to_string(),
            fail_select: true,
            starts: AtomicUsize::new(0),
        });
        let (service, _dir) = service_with(backend);
        let err = service.start(&VideoStartOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendFailed);
        assert!(err.retryable);

        // State stays STARTING; the next start call resyncs it.
        assert_eq!(service.state_store.video_state().await, SubsystemState::Starting);
        let retry = service.start(&VideoStartOptions::default()).await.unwrap_err();
        assert_eq!(retry.kind, ErrorKind::BackendFailed);
    }
}

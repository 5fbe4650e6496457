use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::{
    AudioManager, AudioStateRepository, PipeWireAudioBackend, SndAloopBackend,
    VIRTUAL_SINK_NAME, VIRTUAL_SOURCE_NAME,
};
use crate::backends::AndroidVideoBackend;
use crate::daemon::state::{StateStore, StatusSnapshot};
use crate::daemon::supervisor::ProcessSupervisor;
use crate::helper::{HelperClient, PrivilegedHelper};
use crate::integrations::{AdbAdapter, Pactl, PipeWire, ScrcpyLauncher, V4l2Loopback};
use crate::paths::DaemonPaths;
use crate::user_config::UserConfig;
use crate::video::{VideoManager, VideoRuntimeStatus};

/// Full status as exposed to whatever control surface sits on top.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    #[serde(flatten)]
    pub subsystems: StatusSnapshot,
    pub video_runtime: VideoRuntimeStatus,
    pub device: DeviceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub path: String,
    pub module_loaded: bool,
    pub exists: bool,
    pub busy: bool,
}

/// Composition root: owns the singletons and wires the managers.
pub struct VcamDaemon {
    paths: DaemonPaths,
    state_store: Arc<StateStore>,
    supervisor: Arc<ProcessSupervisor>,
    v4l2: Arc<V4l2Loopback>,
    pub video: Arc<VideoManager>,
    pub audio: Arc<AudioManager>,
}

impl VcamDaemon {
    pub fn new(paths: DaemonPaths, config: &UserConfig) -> Self {
        let state_store = Arc::new(StateStore::new());
        let supervisor = Arc::new(ProcessSupervisor::new(paths.log_dir.clone()));
        let privileged = PrivilegedHelper::new();
        tracing::debug!("Privileged helper transport: {}", privileged.diagnostics());
        let helper: Arc<dyn HelperClient> = Arc::new(privileged);
        let v4l2 = Arc::new(V4l2Loopback::new(config.video_nr));

        let pipewire = Arc::new(PipeWire::new());
        let pactl = Arc::new(Pactl::new());
        let audio = Arc::new(AudioManager::new(
            Arc::clone(&state_store),
            AudioStateRepository::new(paths.audio_state_file()),
            Arc::new(PipeWireAudioBackend::new(
                pipewire,
                pactl,
                VIRTUAL_SINK_NAME,
                VIRTUAL_SOURCE_NAME,
            )),
            Arc::new(SndAloopBackend::new(Arc::clone(&helper))),
        ));

        let backend = Arc::new(AndroidVideoBackend::new(
            Arc::new(AdbAdapter::new()),
            ScrcpyLauncher::new(),
        ));
        let video = Arc::new(VideoManager::new(
            Arc::clone(&state_store),
            Arc::clone(&supervisor),
            backend,
            helper,
            Arc::clone(&v4l2),
            Some(Arc::clone(&audio)),
            config.reconnect_policy(),
            config.preset.clone(),
        ));

        Self {
            paths,
            state_store,
            supervisor,
            v4l2,
            video,
            audio,
        }
    }

    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            subsystems: self.state_store.snapshot().await,
            video_runtime: self.video.runtime_status().await,
            device: DeviceStatus {
                path: self.v4l2.device_path().display().to_string(),
                module_loaded: self.v4l2.module_loaded(),
                exists: self.v4l2.device_exists(),
                busy: self.v4l2.device_busy().await,
            },
        }
    }

    /// Run until SIGTERM/SIGINT, then tear everything down.
    pub async fn run(&self) -> Result<()> {
        self.paths.ensure_directories()?;
        info!("vcamd starting (logs in {})", self.paths.log_dir.display());

        self.wait_for_shutdown_signal().await?;

        info!("Shutting down");
        self.shutdown().await;
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_shutdown_signal(&self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        info!("vcamd ready");
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown_signal(&self) -> Result<()> {
        info!("vcamd ready");
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }

    /// Best-effort teardown; failures are logged, not propagated, so a
    /// partially wedged subsystem cannot block daemon exit.
    pub async fn shutdown(&self) {
        if let Err(e) = self.video.stop().await {
            warn!("Video stop during shutdown failed: {}", e);
        }
        if let Err(e) = self.audio.stop().await {
            warn!("Audio stop during shutdown failed: {}", e);
        }
        self.supervisor.stop_all().await;
        info!("vcamd stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_daemon() -> (VcamDaemon, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths {
            runtime_dir: dir.path().join("run"),
            config_dir: dir.path().join("config"),
            state_dir: dir.path().join("state"),
            log_dir: dir.path().join("state/logs"),
        };
        (VcamDaemon::new(paths, &UserConfig::default()), dir)
    }

    #[tokio::test]
    async fn status_reflects_fresh_daemon() {
        let (daemon, _dir) = test_daemon();
        let status = daemon.status().await;
        assert_eq!(status.subsystems.video.state.as_str(), "STOPPED");
        assert_eq!(status.subsystems.audio.state.as_str(), "STOPPED");
        assert!(status.video_runtime.active_source.is_none());
        assert!(!status.subsystems.started_at.is_empty());
    }

    #[tokio::test]
    async fn status_serializes_with_flattened_subsystems() {
        let (daemon, _dir) = test_daemon();
        let value = serde_json::to_value(daemon.status().await).unwrap();
        assert_eq!(value["video"]["state"], "STOPPED");
        assert_eq!(value["video"]["operation_id"], 0);
        assert_eq!(value["audio"]["state"], "STOPPED");
        assert!(value["video_runtime"]["reconnect"]["enabled"].is_boolean());
        assert_eq!(value["device"]["path"], "/dev/video10");
    }
}

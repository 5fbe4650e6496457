use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::audio::backend::AudioBackend;
use crate::audio::state_repo::AudioStateRepository;
use crate::daemon::state::{StateStore, SubsystemState};
use crate::error::{AppError, Result};

pub const VIRTUAL_SINK_NAME: &str = "vcam_sink";
pub const VIRTUAL_SOURCE_NAME: &str = "vcam_mic";

/// Lifecycle for the microphone bridge. Much simpler than video: one
/// mutex, no reconnect, pluggable backend strategies with a fallback
/// from pipewire to snd_aloop when the service is unreachable.
pub struct AudioManager {
    state_store: Arc<StateStore>,
    repo: AudioStateRepository,
    pipewire_backend: Arc<dyn AudioBackend>,
    snd_aloop_backend: Arc<dyn AudioBackend>,
    lock: Mutex<()>,
    active_backend: std::sync::Mutex<String>,
}

impl AudioManager {
    pub fn new(
        state_store: Arc<StateStore>,
        repo: AudioStateRepository,
        pipewire_backend: Arc<dyn AudioBackend>,
        snd_aloop_backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            state_store,
            repo,
            pipewire_backend,
            snd_aloop_backend,
            lock: Mutex::new(()),
            active_backend: std::sync::Mutex::new("none".to_string()),
        }
    }

    fn active_backend(&self) -> String {
        self.active_backend
            .lock()
            .expect("active backend lock poisoned")
            .clone()
    }

    fn set_active_backend(&self, name: &str) {
        *self
            .active_backend
            .lock()
            .expect("active backend lock poisoned") = name.to_string();
    }

    pub async fn start(&self, backend: &str) -> Result<Value> {
        let _guard = self.lock.lock().await;

        if self.state_store.audio_state().await == SubsystemState::Running {
            return Ok(json!({
                "state": "RUNNING",
                "already_running": true,
                "backend": self.active_backend(),
            }));
        }

        self.state_store.transition_audio(SubsystemState::Starting).await?;

        let selected = if backend == "pipewire" {
            if self.pipewire_backend.ready().await {
                "pipewire"
            } else {
                info!("PipeWire not reachable, falling back to snd_aloop");
                "snd_aloop"
            }
        } else {
            backend
        };

        match selected {
            "pipewire" => {
                let removed = self.pipewire_backend.cleanup_stale().await;
                if !removed.is_empty() {
                    self.repo.save(&json!({
                        "backend": "pipewire_cleanup",
                        "removed_modules": removed,
                    }));
                }
                let payload = self.pipewire_backend.start().await?;
                self.repo.save(&payload);
            }
            "snd_aloop" => {
                self.snd_aloop_backend.start().await?;
                self.repo.save(&json!({"backend": "snd_aloop", "modules": []}));
            }
            other => {
                return Err(AppError::dependency_missing("unsupported audio backend")
                    .with_details(json!({"backend": other})));
            }
        }

        self.set_active_backend(selected);
        self.state_store.transition_audio(SubsystemState::Running).await?;
        info!("Audio bridge running via {}", selected);
        Ok(json!({"state": "RUNNING", "already_running": false, "backend": selected}))
    }

    pub async fn stop(&self) -> Result<Value> {
        let _guard = self.lock.lock().await;

        if self.state_store.audio_state().await == SubsystemState::Stopped {
            return Ok(json!({"state": "STOPPED", "already_stopped": true}));
        }

        self.state_store.transition_audio(SubsystemState::Stopping).await?;

        // Backend teardown is best-effort from whatever state survived;
        // cleanup failure must not block the stop.
        let state_data = self.repo.load();
        match state_data["backend"].as_str().unwrap_or("") {
            "pipewire" | "pipewire_native" | "pipewire_cleanup" => {
                self.pipewire_backend.stop(&state_data).await;
            }
            "snd_aloop" => {
                self.snd_aloop_backend.stop(&state_data).await;
            }
            _ => {}
        }

        self.repo.clear();
        self.set_active_backend("none");
        self.state_store.transition_audio(SubsystemState::Stopped).await?;
        Ok(json!({"state": "STOPPED", "already_stopped": false}))
    }
}

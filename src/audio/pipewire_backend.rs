use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::backend::AudioBackend;
use crate::audio::router::ScrcpyAudioRouter;
use crate::error::{AppError, Result};
use crate::integrations::{Pactl, PactlModule, PipeWire};

/// Virtual microphone on a PipeWire desktop.
///
/// Preferred shape: a null sink plus a remapped source over its monitor,
/// created through the pulse compatibility layer (`pactl`), with the
/// scrcpy stream routed into the sink. When `pactl` is absent but
/// `pw-loopback` works, a native loopback pair is spawned instead.
pub struct PipeWireAudioBackend {
    pipewire: Arc<PipeWire>,
    pactl: Arc<Pactl>,
    sink_name: String,
    source_name: String,
    router: ScrcpyAudioRouter,
    active: Arc<AtomicBool>,
    native_loopback: Mutex<Option<tokio::process::Child>>,
}

impl PipeWireAudioBackend {
    pub fn new(
        pipewire: Arc<PipeWire>,
        pactl: Arc<Pactl>,
        sink_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        let sink_name = sink_name.into();
        let router = ScrcpyAudioRouter::new(Arc::clone(&pactl), sink_name.clone());
        Self {
            pipewire,
            pactl,
            sink_name,
            source_name: source_name.into(),
            router,
            active: Arc::new(AtomicBool::new(false)),
            native_loopback: Mutex::new(None),
        }
    }

    fn is_our_module(&self, module: &PactlModule) -> bool {
        if !matches!(
            module.name.as_str(),
            "module-null-sink" | "module-remap-source" | "module-loopback"
        ) {
            return false;
        }
        let tokens = [
            format!("sink_name={}", self.sink_name),
            format!("source_name={}", self.source_name),
            format!("master={}.monitor", self.sink_name),
            format!("sink={}", self.sink_name),
            "VCam Mic Bridge".to_string(),
            "VCam Mic".to_string(),
        ];
        tokens.iter().any(|token| module.args.contains(token.as_str()))
    }
}

#[async_trait]
impl AudioBackend for PipeWireAudioBackend {
    async fn ready(&self) -> bool {
        self.pipewire.available() && self.pipewire.running().await
    }

    async fn cleanup_stale(&self) -> Vec<u32> {
        if !self.pactl.available() {
            return Vec::new();
        }
        let Ok(modules) = self.pactl.list_modules().await else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for module in modules {
            if !self.is_our_module(&module) {
                continue;
            }
            let Ok(module_id) = module.id.parse::<u32>() else {
                continue;
            };
            self.pactl.unload_module(module_id).await;
            removed.push(module_id);
        }
        if !removed.is_empty() {
            info!("Removed {} stale virtual-mic module(s)", removed.len());
        }
        removed
    }

    async fn start(&self) -> Result<Value> {
        if self.pactl.available() {
            let sink_id = self
                .pactl
                .load_module(
                    "module-null-sink",
                    &[
                        format!("sink_name={}", self.sink_name),
                        "sink_properties=device.description=Hidden_VCam_Bridge device.hidden=1"
                            .to_string(),
                    ],
                )
                .await
                .map_err(|e| pactl_setup_error(&e))?;

            let source_id = match self
                .pactl
                .load_module(
                    "module-remap-source",
                    &[
                        format!("master={}.monitor", self.sink_name),
                        format!("source_name={}", self.source_name),
                        "source_properties=device.description=VCam_Mic".to_string(),
                    ],
                )
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    // Half-built bridge is worse than none.
                    self.pactl.unload_module(sink_id).await;
                    return Err(pactl_setup_error(&e));
                }
            };

            let move_result = self.router.move_once().await;
            self.active.store(true, Ordering::SeqCst);
            self.router.start_background(Arc::clone(&self.active));
            return Ok(json!({
                "backend": "pipewire",
                "modules": [sink_id, source_id],
                "move_result": move_result,
            }));
        }

        let native_loopback_bin = if self.pipewire.supports_native_virtual_mic().await {
            self.pipewire.pw_loopback.clone()
        } else {
            None
        };
        if let Some(pw_loopback) = native_loopback_bin {
            let capture_props = format!(
                "{{ node.name=\"{}\" node.description=\"VCam Sink\" media.class=\"Audio/Sink\" }}",
                self.sink_name
            );
            let playback_props = format!(
                "{{ node.name=\"{}\" node.description=\"VCam Mic\" media.class=\"Audio/Source\" }}",
                self.source_name
            );
            let child = tokio::process::Command::new(pw_loopback)
                .args(["--capture-props", &capture_props])
                .args(["--playback-props", &playback_props])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| {
                    AppError::dependency_missing("failed to start pw-loopback").with_details(
                        json!({"tool": "pw-loopback", "package": "pipewire-bin", "error": e.to_string()}),
                    )
                })?;
            debug!("Spawned native pw-loopback (PID {:?})", child.id());
            *self
                .native_loopback
                .lock()
                .expect("native loopback lock poisoned") = Some(child);
            return Ok(json!({"backend": "pipewire_native", "modules": []}));
        }

        Err(
            AppError::dependency_missing("pipewire routing requires pactl or pw-loopback")
                .with_details(json!({
                    "tools": {
                        "pactl": self.pactl.available(),
                        "pw_loopback": self.pipewire.pw_loopback.is_some(),
                    },
                    "packages": ["pulseaudio-utils", "pipewire-bin"],
                })),
        )
    }

    async fn stop(&self, state: &Value) {
        if let Some(modules) = state["modules"].as_array() {
            for module_id in modules {
                if let Some(id) = module_id.as_u64() {
                    self.pactl.unload_module(id as u32).await;
                }
            }
        }
        self.cleanup_stale().await;

        let native = self
            .native_loopback
            .lock()
            .expect("native loopback lock poisoned")
            .take();
        if let Some(mut child) = native {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill pw-loopback: {}", e);
            }
        }

        self.active.store(false, Ordering::SeqCst);
        self.router.stop_background();
    }
}

fn pactl_setup_error(cause: &AppError) -> AppError {
    AppError::dependency_missing("failed to create virtual mic via pactl").with_details(json!({
        "tool": "pactl",
        "package": "pulseaudio-utils",
        "error": cause.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_without_tools() -> PipeWireAudioBackend {
        PipeWireAudioBackend::new(
            Arc::new(PipeWire::default()),
            Arc::new(Pactl::unavailable()),
            "vcam_sink",
            "vcam_mic",
        )
    }

    #[test]
    fn module_matching_is_scoped_to_our_names() {
        let backend = backend_without_tools();

        let ours = PactlModule {
            id: "12".to_string(),
            name: "module-null-sink".to_string(),
            args: "sink_name=vcam_sink sink_properties=...".to_string(),
        };
        assert!(backend.is_our_module(&ours));

        let remap = PactlModule {
            id: "13".to_string(),
            name: "module-remap-source".to_string(),
            args: "master=vcam_sink.monitor source_name=vcam_mic".to_string(),
        };
        assert!(backend.is_our_module(&remap));

        let foreign = PactlModule {
            id: "14".to_string(),
            name: "module-null-sink".to_string(),
            args: "sink_name=someone_elses_sink".to_string(),
        };
        assert!(!backend.is_our_module(&foreign));

        let wrong_kind = PactlModule {
            id: "15".to_string(),
            name: "module-echo-cancel".to_string(),
            args: "sink_name=vcam_sink".to_string(),
        };
        assert!(!backend.is_our_module(&wrong_kind));
    }

    #[tokio::test]
    async fn cleanup_without_pactl_is_empty() {
        let backend = backend_without_tools();
        assert!(backend.cleanup_stale().await.is_empty());
    }

    #[tokio::test]
    async fn stop_with_empty_state_is_harmless() {
        let backend = backend_without_tools();
        backend.stop(&json!({})).await;
        backend.stop(&json!({"backend": "pipewire", "modules": [1, 2]})).await;
    }
}

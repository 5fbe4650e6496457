use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::integrations::{AdbAdapter, CameraCommandSpec, ScrcpyLauncher};
use crate::video::CameraFacing;

/// A selectable phone source as reported by device discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub serial: String,
    pub state: String,
}

/// Everything the session service needs to launch a bridge process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub serial: String,
    pub sink_path: String,
    pub preset: String,
    pub camera_facing: Option<CameraFacing>,
    pub camera_rotation: Option<u16>,
    pub preview_window: bool,
    pub enable_audio: bool,
}

/// Source discovery and launch-command construction for one video
/// backend family. The session service is written against this seam so
/// tests can substitute a fake.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<SourceInfo>>;

    /// Pick a source: explicit serial first, then transport preference,
    /// then the first healthy device. "No device" is retryable.
    async fn select_default_source(
        &self,
        preferred_serial: Option<&str>,
        preferred_transport: Option<&str>,
    ) -> Result<SourceInfo>;

    fn build_start_command(&self, spec: &LaunchSpec) -> Result<Vec<String>>;
}

/// Android phones over adb, bridged with scrcpy.
pub struct AndroidVideoBackend {
    adb: Arc<AdbAdapter>,
    scrcpy: ScrcpyLauncher,
}

impl AndroidVideoBackend {
    pub fn new(adb: Arc<AdbAdapter>, scrcpy: ScrcpyLauncher) -> Self {
        Self { adb, scrcpy }
    }
}

#[async_trait]
impl VideoBackend for AndroidVideoBackend {
    async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        Ok(self
            .adb
            .list_devices()
            .await
            .into_iter()
            .map(|d| SourceInfo {
                serial: d.serial,
                state: d.state,
            })
            .collect())
    }

    async fn select_default_source(
        &self,
        preferred_serial: Option<&str>,
        preferred_transport: Option<&str>,
    ) -> Result<SourceInfo> {
        if !self.adb.available() {
            return Err(AppError::dependency_missing("adb is missing")
                .with_details(json!({"tool": "adb", "package": "android-tools-adb"})));
        }
        let devices = self.adb.list_devices().await;

        // Explicit device selection first.
        if let Some(serial) = preferred_serial {
            if let Some(dev) = devices.iter().find(|d| d.serial == serial) {
                if dev.is_healthy() {
                    return Ok(SourceInfo {
                        serial: dev.serial.clone(),
                        state: dev.state.clone(),
                    });
                }
                return Err(AppError::backend_failed(
                    "preferred Android device is not authorized/ready",
                )
                .with_details(json!({
                    "serial": serial,
                    "state": dev.state,
                    "devices": devices,
                })));
            }
        }

        // Then transport preference (usb/wifi) among healthy devices.
        if let Some(transport) = preferred_transport {
            if transport == "usb" || transport == "wifi" {
                for dev in &devices {
                    if dev.is_healthy() && AdbAdapter::transport_of(&dev.serial) == transport {
                        return Ok(SourceInfo {
                            serial: dev.serial.clone(),
                            state: dev.state.clone(),
                        });
                    }
                }
            }
        }

        // Finally any healthy device.
        if let Some(dev) = devices.iter().find(|d| d.is_healthy()) {
            return Ok(SourceInfo {
                serial: dev.serial.clone(),
                state: dev.state.clone(),
            });
        }
        Err(AppError::backend_failed("no authorized Android device available")
            .with_details(json!({"devices": devices})))
    }

    fn build_start_command(&self, spec: &LaunchSpec) -> Result<Vec<String>> {
        if !self.scrcpy.available() {
            return Err(AppError::dependency_missing("scrcpy is missing")
                .with_details(json!({"tool": "scrcpy", "package": "scrcpy"})));
        }
        self.scrcpy
            .command_for_android_camera(&CameraCommandSpec {
                serial: &spec.serial,
                sink_path: &spec.sink_path,
                preset: &spec.preset,
                camera_facing: spec.camera_facing,
                camera_rotation: spec.camera_rotation,
                preview_window: spec.preview_window,
                enable_audio: spec.enable_audio,
            })
            .ok_or_else(|| {
                AppError::dependency_missing("scrcpy is missing")
                    .with_details(json!({"tool": "scrcpy", "package": "scrcpy"}))
            })
    }
}

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, ErrorKind, Result};
use crate::helper::HelperClient;
use crate::integrations::V4l2Loopback;

const DEVICE_LABEL: &str = "VCam Camera";

/// Policy wrapper over the privileged helper for virtual-camera-device
/// health: preflight checks before a start, opportunistic reloads after a
/// stop, and user-requested resets with busy-device diagnostics.
pub struct DeviceResetService {
    helper: Arc<dyn HelperClient>,
    v4l2: Arc<V4l2Loopback>,
}

impl DeviceResetService {
    pub fn new(helper: Arc<dyn HelperClient>, v4l2: Arc<V4l2Loopback>) -> Self {
        Self { helper, v4l2 }
    }

    fn base_params(&self) -> Value {
        json!({
            "video_nr": self.v4l2.video_nr,
            "label": DEVICE_LABEL,
            "exclusive_caps": true,
        })
    }

    /// Preflight before every video start: reload the module only when
    /// the helper says the device needs it.
    pub async fn ensure_ready(&self) -> Result<()> {
        let status = self.helper.call("v4l2.status", self.base_params()).await?;
        if status["requires_reload"].as_bool().unwrap_or(false) {
            debug!("v4l2 device requires reload before start");
            let mut params = self.base_params();
            params["force"] = json!(false);
            params["always_reload"] = json!(false);
            self.helper.call("v4l2.reload", params).await?;
        }
        Ok(())
    }

    /// Always-reload variant used after stop so the next start finds a
    /// clean device. Failure is reported in the payload, never raised.
    pub async fn best_effort_reload_after_stop(&self) -> Value {
        let mut params = self.base_params();
        params["force"] = json!(false);
        params["always_reload"] = json!(true);
        match self.helper.call("v4l2.reload", params).await {
            Ok(result) => json!({"ok": true, "result": result}),
            Err(err) => {
                warn!("Post-stop device reload failed: {}", err);
                json!({"ok": false, "error": err.to_string()})
            }
        }
    }

    /// Reload with the caller's `force` flag. Busy-device failures are
    /// enriched with blocking PIDs and a remediation hint.
    pub async fn reset(&self, force: bool) -> Result<Value> {
        let mut params = self.base_params();
        params["force"] = json!(force);
        let result = match self.helper.call("v4l2.reload", params).await {
            Ok(result) => result,
            Err(err) if err.kind == ErrorKind::BusyDevice => {
                let blockers = self.v4l2.device_blockers().await;
                // Keep whatever the helper reported; blocker PIDs are
                // authoritative from our side of the boundary.
                let mut details = match err.details {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                details.insert("blocker_pids".to_string(), json!(blockers));
                details
                    .entry("device".to_string())
                    .or_insert_with(|| json!(self.v4l2.device_path().display().to_string()));
                details.entry("hint".to_string()).or_insert_with(|| {
                    json!("close applications using the camera, then retry reset; force=true may still fail while actively busy")
                });
                return Err(AppError::busy_device(
                    "cannot reset while target v4l2 device is in use",
                )
                .with_details(Value::Object(details)));
            }
            Err(err) => return Err(err),
        };

        let helper_status = result
            .get("status_after")
            .filter(|v| !v.is_null())
            .or_else(|| result.get("status_before"))
            .cloned();

        Ok(json!({
            "state": "RESET",
            "result": result,
            "device": self.v4l2.device_path().display().to_string(),
            "helper_status": helper_status,
        }))
    }
}

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::paths;

/// Privileged actions the daemon is allowed to request from the helper.
/// Anything else is rejected before dispatch.
pub const ALLOWED_ACTIONS: &[&str] = &[
    "noop",
    "v4l2.ensure_config",
    "v4l2.load",
    "v4l2.reload",
    "v4l2.status",
    "snd_aloop.load",
    "snd_aloop.unload",
    "snd_aloop.status",
];

/// Capability to run allow-listed root-only actions (kernel module
/// load/reload) through a separate elevated process.
#[async_trait]
pub trait HelperClient: Send + Sync {
    async fn call(&self, action: &str, params: Value) -> Result<Value>;
}

/// Talks JSON over stdin/stdout to the helper binary, elevated via
/// pkexec or a transient systemd-run root unit.
pub struct PrivilegedHelper {
    helper_bin: String,
    mode: String,
    timeout: Duration,
}

impl PrivilegedHelper {
    pub fn new() -> Self {
        Self {
            helper_bin: paths::helper_bin(),
            mode: paths::helper_mode(),
            timeout: Duration::from_secs_f64(paths::helper_timeout_secs()),
        }
    }

    pub fn with_settings(helper_bin: impl Into<String>, mode: impl Into<String>, timeout: Duration) -> Self {
        Self {
            helper_bin: helper_bin.into(),
            mode: mode.into(),
            timeout,
        }
    }

    fn helper_command(&self) -> Vec<String> {
        let mode = self.mode.trim().to_lowercase();
        match mode.as_str() {
            "direct" => vec![self.helper_bin.clone()],
            "systemd-run" => self.systemd_run_cmd(),
            "auto" | "pkexec" => {
                if pkexec_usable() {
                    vec!["pkexec".to_string(), self.helper_bin.clone()]
                } else if which::which("systemd-run").is_ok() {
                    self.systemd_run_cmd()
                } else {
                    vec!["pkexec".to_string(), self.helper_bin.clone()]
                }
            }
            _ => vec!["pkexec".to_string(), self.helper_bin.clone()],
        }
    }

    fn systemd_run_cmd(&self) -> Vec<String> {
        [
            "systemd-run",
            "--quiet",
            "--pipe",
            "--wait",
            "--collect",
            "-p",
            "Type=oneshot",
            "-p",
            "User=root",
            "-p",
            "Group=root",
            &self.helper_bin,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn diagnostics(&self) -> Value {
        let cmd = self.helper_command();
        json!({
            "configured_mode": self.mode.trim().to_lowercase(),
            "effective_runner": cmd.first().cloned().unwrap_or_default(),
            "effective_command": cmd,
            "helper_bin": self.helper_bin,
            "pkexec_usable": pkexec_usable(),
            "systemd_run_available": which::which("systemd-run").is_ok(),
        })
    }

    async fn exec_helper(&self, cmd: &[String], payload: &[u8], action: &str) -> Result<HelperOutput> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| AppError::permission_denied("empty helper command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|_| {
                AppError::permission_denied("privileged helper is not available")
                    .with_details(json!({"binary": program}))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A helper that exits before reading produces a benign EPIPE.
            let _ = stdin.write_all(payload).await;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::timeout("privileged helper timed out").with_details(json!({
                    "action": action,
                    "timeout_s": self.timeout.as_secs_f64(),
                }))
            })?
            .map_err(|e| {
                AppError::backend_failed(format!("helper I/O failed: {e}"))
                    .with_details(json!({"action": action}))
            })?;

        Ok(HelperOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            returncode: output.status.code().unwrap_or(-1),
        })
    }
}

impl Default for PrivilegedHelper {
    fn default() -> Self {
        Self::new()
    }
}

struct HelperOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    returncode: i32,
}

#[async_trait]
impl HelperClient for PrivilegedHelper {
    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        if !ALLOWED_ACTIONS.contains(&action) {
            return Err(AppError::unsupported("unsupported privileged action")
                .with_details(json!({"action": action})));
        }
        if !params.is_object() {
            return Err(AppError::unsupported("privileged action params must be an object")
                .with_details(json!({"action": action})));
        }
        if !Path::new(&self.helper_bin).is_absolute() {
            return Err(AppError::permission_denied("helper path must be absolute")
                .with_details(json!({"binary": self.helper_bin})));
        }

        let request = json!({
            "request_id": Uuid::new_v4().to_string(),
            "action": action,
            "params": params,
        });
        let payload = serde_json::to_vec(&request).map_err(|e| {
            AppError::backend_failed(format!("failed to encode helper request: {e}"))
        })?;

        debug!("Calling privileged helper: {}", action);
        let cmd = self.helper_command();
        let mut output = self.exec_helper(&cmd, &payload, action).await?;

        if output.returncode != 0 {
            let stderr_text = String::from_utf8_lossy(&output.stderr).trim().to_lowercase();
            // pkexec without setuid cannot elevate at all; systemd-run may
            // still work via polkit.
            if stderr_text.contains("pkexec must be setuid root")
                && cmd.first().map(String::as_str) == Some("pkexec")
                && which::which("systemd-run").is_ok()
            {
                output = self
                    .exec_helper(&self.systemd_run_cmd(), &payload, action)
                    .await?;
            }
        }

        if output.returncode != 0 {
            let stderr_text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lower = stderr_text.to_lowercase();
            if lower.contains("pkexec must be setuid root") {
                return Err(AppError::permission_denied(
                    "pkexec is misconfigured (missing setuid root)",
                )
                .with_details(json!({
                    "action": action,
                    "returncode": output.returncode,
                    "stderr": stderr_text,
                    "hint": "set VCAMD_HELPER_MODE=systemd-run or reinstall policykit-1 and verify /usr/bin/pkexec is root:root 4755",
                })));
            }
            if output.returncode == 126
                || output.returncode == 127
                || lower.contains("not authorized")
                || lower.contains("authentication")
            {
                return Err(AppError::permission_denied("authorization denied or cancelled")
                    .with_details(json!({
                        "action": action,
                        "returncode": output.returncode,
                        "stderr": stderr_text,
                        "hint": "confirm polkit rule and complete authentication prompt",
                    })));
            }
            return Err(AppError::permission_denied("privileged action failed").with_details(
                json!({
                    "action": action,
                    "returncode": output.returncode,
                    "stderr": stderr_text,
                }),
            ));
        }

        let response: Value = serde_json::from_slice(&output.stdout).map_err(|_| {
            AppError::backend_failed("invalid response from helper")
                .with_details(json!({"action": action}))
        })?;

        if !response["ok"].as_bool().unwrap_or(false) {
            let err = response.get("error").cloned().unwrap_or(Value::Null);
            let code = err["code"].as_str().unwrap_or("E_HELPER_FAILED").to_string();
            let message = err["message"]
                .as_str()
                .unwrap_or("helper action failed")
                .to_string();
            let details = json!({"action": action, "helper_code": code.clone(), "error": err});
            return Err(match code.as_str() {
                "E_BUSY_DEVICE" => AppError::busy_device(message).with_details(details),
                "E_ACTION" | "E_INVALID_PARAM" => {
                    AppError::unsupported(message).with_details(details)
                }
                "E_TIMEOUT" => AppError::timeout(message).with_details(details),
                _ => {
                    let mut e = AppError::backend_failed(message).with_details(details);
                    e.retryable = false;
                    e
                }
            });
        }

        Ok(response.get("data").cloned().filter(Value::is_object).unwrap_or_else(|| json!({})))
    }
}

fn pkexec_usable() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let Ok(path) = which::which("pkexec") else {
            return false;
        };
        match std::fs::metadata(&path) {
            Ok(meta) => meta.mode() & 0o4000 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

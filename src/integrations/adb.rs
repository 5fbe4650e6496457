use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

/// One entry from `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdbDevice {
    pub serial: String,
    pub state: String,
}

impl AdbDevice {
    pub fn is_healthy(&self) -> bool {
        self.state == "device"
    }
}

/// Thin wrapper around the `adb` binary. Invocations are serialized
/// because the adb server misbehaves under concurrent client commands.
pub struct AdbAdapter {
    adb_bin: Option<PathBuf>,
    lock: Mutex<()>,
}

impl AdbAdapter {
    pub fn new() -> Self {
        let adb_bin = std::env::var("VCAMD_ADB_BIN")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| which::which("adb").ok());
        Self {
            adb_bin,
            lock: Mutex::new(()),
        }
    }

    pub fn with_binary(adb_bin: impl Into<PathBuf>) -> Self {
        Self {
            adb_bin: Some(adb_bin.into()),
            lock: Mutex::new(()),
        }
    }

    pub fn available(&self) -> bool {
        self.adb_bin.is_some()
    }

    pub async fn list_devices(&self) -> Vec<AdbDevice> {
        let Some(ref adb) = self.adb_bin else {
            return Vec::new();
        };

        let output = {
            let _guard = self.lock.lock().await;
            Command::new(adb).arg("devices").output().await
        };
        let output = match output {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                debug!("adb devices failed with status {:?}", out.status.code());
                return Vec::new();
            }
            Err(e) => {
                debug!("adb devices failed to run: {}", e);
                return Vec::new();
            }
        };

        parse_devices(&String::from_utf8_lossy(&output.stdout))
    }

    /// "wifi" for tcp endpoints (serial contains a port), "usb" otherwise.
    pub fn transport_of(serial: &str) -> &'static str {
        if serial.contains(':') {
            "wifi"
        } else {
            "usb"
        }
    }
}

impl Default for AdbAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_devices(stdout: &str) -> Vec<AdbDevice> {
    let mut devices = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") {
            continue;
        }
        let mut parts = line.split_whitespace();
        if let (Some(serial), Some(state)) = (parts.next(), parts.next()) {
            devices.push(AdbDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            });
        }
    }
    devices
}

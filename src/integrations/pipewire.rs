use std::path::PathBuf;
use tokio::process::Command;

/// Probes for a usable PipeWire service and its tooling.
pub struct PipeWire {
    pw_cli: Option<PathBuf>,
    pactl: Option<PathBuf>,
    pub pw_loopback: Option<PathBuf>,
}

impl PipeWire {
    pub fn new() -> Self {
        Self {
            pw_cli: which::which("pw-cli").ok(),
            pactl: which::which("pactl").ok(),
            pw_loopback: which::which("pw-loopback").ok(),
        }
    }

    pub fn available(&self) -> bool {
        self.pw_cli.is_some() || self.pactl.is_some() || self.pw_loopback.is_some()
    }

    /// Whether the service answers; tries pw-cli first, then the pulse
    /// compatibility layer.
    pub async fn running(&self) -> bool {
        if let Some(ref pw_cli) = self.pw_cli {
            if let Ok(out) = Command::new(pw_cli).args(["info", "0"]).output().await {
                if out.status.success() {
                    return true;
                }
            }
        }
        if let Some(ref pactl) = self.pactl {
            if let Ok(out) = Command::new(pactl).arg("info").output().await {
                return out.status.success();
            }
        }
        false
    }

    pub async fn supports_native_virtual_mic(&self) -> bool {
        self.pw_loopback.is_some() && self.running().await
    }
}

impl Default for PipeWire {
    fn default() -> Self {
        Self::new()
    }
}

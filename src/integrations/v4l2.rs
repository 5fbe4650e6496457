use std::path::PathBuf;
use tokio::process::Command;

/// Facts about the v4l2loopback device the daemon streams into.
/// Loading/reloading the module itself is the privileged helper's job.
pub struct V4l2Loopback {
    pub video_nr: u32,
}

impl V4l2Loopback {
    pub fn new(video_nr: u32) -> Self {
        Self { video_nr }
    }

    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", self.video_nr))
    }

    pub fn module_loaded(&self) -> bool {
        let Ok(modules) = std::fs::read_to_string("/proc/modules") else {
            return false;
        };
        modules.lines().any(|line| line.starts_with("v4l2loopback "))
    }

    pub fn device_exists(&self) -> bool {
        self.device_path().exists()
    }

    pub async fn device_busy(&self) -> bool {
        !self.device_blockers().await.is_empty()
    }

    /// PIDs holding the device open, per `fuser`. Empty when `fuser` is
    /// unavailable or nothing blocks.
    pub async fn device_blockers(&self) -> Vec<i32> {
        let output = match Command::new("fuser")
            .arg(self.device_path())
            .output()
            .await
        {
            Ok(out) => out,
            Err(_) => return Vec::new(),
        };
        if !output.status.success() {
            return Vec::new();
        }

        // fuser prints PIDs on stdout and the device path on stderr,
        // with layout varying across versions.
        let raw = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };
        let mut pids: Vec<i32> = raw
            .replace(':', " ")
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_from_video_nr() {
        let v4l2 = V4l2Loopback::new(10);
        assert_eq!(v4l2.device_path(), PathBuf::from("/dev/video10"));
    }

    #[tokio::test]
    async fn blockers_empty_for_nonexistent_device() {
        let v4l2 = V4l2Loopback::new(250);
        assert!(v4l2.device_blockers().await.is_empty());
        assert!(!v4l2.device_busy().await);
    }
}

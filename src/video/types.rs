use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VALID_ROTATIONS: [u16; 4] = [0, 90, 180, 270];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Back => "back",
        }
    }
}

/// Options for one android-camera session start.
#[derive(Debug, Clone)]
pub struct VideoStartOptions {
    pub serial: Option<String>,
    pub camera_facing: CameraFacing,
    pub camera_rotation: u16,
    pub preview_window: bool,
    pub enable_audio: bool,
    pub preset: String,
}

impl Default for VideoStartOptions {
    fn default() -> Self {
        Self {
            serial: None,
            camera_facing: CameraFacing::Front,
            camera_rotation: 0,
            preview_window: false,
            enable_audio: true,
            preset: "balanced".to_string(),
        }
    }
}

/// The active android source; exists iff a session is running (or mid-start
/// with a live process).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSource {
    pub serial: String,
    pub camera_facing: CameraFacing,
    pub camera_rotation: u16,
    pub preview_window: bool,
}

/// Immutable reconnect configuration. `normalized()` clamps it into the
/// supported range; a disabled policy is zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_ms: 1500,
        }
    }
}

impl ReconnectPolicy {
    pub fn normalized(self) -> Self {
        if !self.enabled {
            return Self {
                enabled: false,
                max_attempts: 0,
                backoff_ms: 0,
            };
        }
        Self {
            enabled: true,
            max_attempts: self.max_attempts.min(20),
            backoff_ms: self.backoff_ms.clamp(100, 60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectState {
    Idle,
    Exited,
    Waiting,
    Restarting,
    Running,
    Failed,
    Exhausted,
    Stopped,
}

/// Live reconnect progress, recreated from the policy on every video
/// start and mutated only by the watch loop.
#[derive(Debug, Clone, Serialize)]
pub struct ReconnectStatus {
    pub enabled: bool,
    pub state: ReconnectState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub next_retry_in_ms: Option<u64>,
    pub last_exit_code: Option<i32>,
}

impl ReconnectStatus {
    pub fn from_policy(policy: ReconnectPolicy) -> Self {
        let p = policy.normalized();
        Self {
            enabled: p.enabled,
            state: ReconnectState::Idle,
            attempt: 0,
            max_attempts: p.max_attempts,
            backoff_ms: p.backoff_ms,
            next_retry_in_ms: None,
            last_exit_code: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoStartOutcome {
    pub state: &'static str,
    pub already_running: bool,
    pub source: Option<VideoSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoStopOutcome {
    pub state: &'static str,
    pub already_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_stop_reset: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_clamps_into_range() {
        let policy = ReconnectPolicy {
            enabled: true,
            max_attempts: 50,
            backoff_ms: 1,
        }
        .normalized();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.backoff_ms, 100);

        let policy = ReconnectPolicy {
            enabled: true,
            max_attempts: 5,
            backoff_ms: 120_000,
        }
        .normalized();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_ms, 60_000);
    }

    #[test]
    fn disabled_policy_is_zeroed() {
        let policy = ReconnectPolicy {
            enabled: false,
            max_attempts: 7,
            backoff_ms: 9000,
        }
        .normalized();
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.backoff_ms, 0);
    }

    #[test]
    fn status_starts_idle_from_policy() {
        let status = ReconnectStatus::from_policy(ReconnectPolicy::default());
        assert_eq!(status.state, ReconnectState::Idle);
        assert_eq!(status.attempt, 0);
        assert_eq!(status.max_attempts, 3);
        assert!(status.last_exit_code.is_none());
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

/// Lifecycle state of one subsystem ("video" or "audio").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubsystemState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl SubsystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemState::Stopped => "STOPPED",
            SubsystemState::Starting => "STARTING",
            SubsystemState::Running => "RUNNING",
            SubsystemState::Stopping => "STOPPING",
            SubsystemState::Error => "ERROR",
        }
    }

    fn can_transition_to(&self, next: SubsystemState) -> bool {
        use SubsystemState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Error)
                | (Running, Stopping)
                | (Running, Error)
                | (Stopping, Stopped)
                | (Stopping, Error)
                | (Error, Stopped)
                | (Error, Starting)
        )
    }
}

/// Error payload recorded when a subsystem enters ERROR.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    pub details: Value,
    pub ts: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsystemStatus {
    pub state: SubsystemState,
    pub operation_id: u64,
    pub last_error: Option<ErrorRecord>,
}

impl Default for SubsystemStatus {
    fn default() -> Self {
        Self {
            state: SubsystemState::Stopped,
            operation_id: 0,
            last_error: None,
        }
    }
}

/// Snapshot of both subsystems, safe to serialize into status responses.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: String,
    pub video: SubsystemStatus,
    pub audio: SubsystemStatus,
}

#[derive(Debug)]
struct RuntimeStatus {
    started_at: DateTime<Utc>,
    video: SubsystemStatus,
    audio: SubsystemStatus,
}

/// Holds the lifecycle state of the "video" and "audio" subsystems.
///
/// Both subsystems share one lock so a snapshot is atomic across them.
/// Every real transition bumps the subsystem's operation id; a same-state
/// transition is a no-op and does not bump it.
pub struct StateStore {
    inner: Mutex<RuntimeStatus>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeStatus {
                started_at: Utc::now(),
                video: SubsystemStatus::default(),
                audio: SubsystemStatus::default(),
            }),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        StatusSnapshot {
            started_at: inner.started_at.to_rfc3339(),
            video: inner.video.clone(),
            audio: inner.audio.clone(),
        }
    }

    pub async fn video_state(&self) -> SubsystemState {
        self.inner.lock().await.video.state
    }

    pub async fn audio_state(&self) -> SubsystemState {
        self.inner.lock().await.audio.state
    }

    /// Apply a video transition; returns the new operation id.
    pub async fn transition_video(&self, next: SubsystemState) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Self::transition(&mut inner.video, next, "video")?;
        Ok(inner.video.operation_id)
    }

    /// Apply an audio transition; returns the new operation id.
    pub async fn transition_audio(&self, next: SubsystemState) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Self::transition(&mut inner.audio, next, "audio")?;
        Ok(inner.audio.operation_id)
    }

    /// Unconditional jump to ERROR, recording the failure payload.
    pub async fn set_video_error(&self, code: &str, message: &str, details: Value) {
        let mut inner = self.inner.lock().await;
        Self::record_error(&mut inner.video, code, message, details);
    }

    pub async fn set_audio_error(&self, code: &str, message: &str, details: Value) {
        let mut inner = self.inner.lock().await;
        Self::record_error(&mut inner.audio, code, message, details);
    }

    fn transition(target: &mut SubsystemStatus, next: SubsystemState, subsystem: &str) -> Result<()> {
        let current = target.state;
        if current == next {
            return Ok(());
        }

        if !current.can_transition_to(next) {
            return Err(AppError::invalid_transition(format!(
                "invalid {subsystem} transition {} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }

        target.state = next;
        target.operation_id += 1;
        if next != SubsystemState::Error {
            target.last_error = None;
        }
        Ok(())
    }

    fn record_error(target: &mut SubsystemStatus, code: &str, message: &str, details: Value) {
        target.last_error = Some(ErrorRecord {
            code: code.to_string(),
            message: message.to_string(),
            details,
            ts: Utc::now().to_rfc3339(),
        });
        target.state = SubsystemState::Error;
        target.operation_id += 1;
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn legal_lifecycle_walk() {
        let store = StateStore::new();
        assert_eq!(store.transition_video(SubsystemState::Starting).await.unwrap(), 1);
        assert_eq!(store.transition_video(SubsystemState::Running).await.unwrap(), 2);
        assert_eq!(store.transition_video(SubsystemState::Stopping).await.unwrap(), 3);
        assert_eq!(store.transition_video(SubsystemState::Stopped).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn illegal_edges_rejected_and_state_unchanged() {
        let store = StateStore::new();
        let err = store.transition_video(SubsystemState::Running).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidTransition);

        let snap = store.snapshot().await;
        assert_eq!(snap.video.state, SubsystemState::Stopped);
        assert_eq!(snap.video.operation_id, 0);
    }

    #[tokio::test]
    async fn same_state_is_noop_without_bump() {
        let store = StateStore::new();
        store.transition_video(SubsystemState::Starting).await.unwrap();
        let id = store.transition_video(SubsystemState::Starting).await.unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn error_jump_always_legal_and_records_payload() {
        let store = StateStore::new();
        store
            .set_video_error("E_BACKEND_FAILED", "scrcpy exited", json!({"returncode": 1}))
            .await;

        let snap = store.snapshot().await;
        assert_eq!(snap.video.state, SubsystemState::Error);
        assert_eq!(snap.video.operation_id, 1);
        let err = snap.video.last_error.unwrap();
        assert_eq!(err.code, "E_BACKEND_FAILED");
        assert_eq!(err.details["returncode"], 1);
        assert!(!err.ts.is_empty());
    }

    #[tokio::test]
    async fn leaving_error_clears_last_error() {
        let store = StateStore::new();
        store.set_video_error("E_BACKEND_FAILED", "boom", Value::Null).await;
        store.transition_video(SubsystemState::Stopped).await.unwrap();

        let snap = store.snapshot().await;
        assert!(snap.video.last_error.is_none());
        assert_eq!(snap.video.state, SubsystemState::Stopped);
    }

    #[tokio::test]
    async fn error_recovers_via_starting() {
        let store = StateStore::new();
        store.set_audio_error("E_DEP_MISSING", "pactl missing", Value::Null).await;
        store.transition_audio(SubsystemState::Starting).await.unwrap();
        assert_eq!(store.audio_state().await, SubsystemState::Starting);
    }

    #[tokio::test]
    async fn subsystems_are_independent() {
        let store = StateStore::new();
        store.transition_video(SubsystemState::Starting).await.unwrap();

        let snap = store.snapshot().await;
        assert_eq!(snap.video.state, SubsystemState::Starting);
        assert_eq!(snap.audio.state, SubsystemState::Stopped);
        assert_eq!(snap.audio.operation_id, 0);
    }

    #[test]
    fn transition_table_matches_design() {
        use SubsystemState::*;
        let all = [Stopped, Starting, Running, Stopping, Error];
        let allowed: &[(SubsystemState, SubsystemState)] = &[
            (Stopped, Starting),
            (Starting, Running),
            (Starting, Stopping),
            (Starting, Error),
            (Running, Stopping),
            (Running, Error),
            (Stopping, Stopped),
            (Stopping, Error),
            (Error, Stopped),
            (Error, Starting),
        ];
        for from in all {
            for to in all {
                if from == to {
                    continue;
                }
                let expect = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expect, "{from:?} -> {to:?}");
            }
        }
    }
}

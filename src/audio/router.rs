use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::integrations::Pactl;

const MOVE_PROBE_ROUNDS: u32 = 12;
const MOVE_PROBE_DELAY: Duration = Duration::from_millis(200);
const BACKGROUND_PERIOD: Duration = Duration::from_millis(800);

/// Steers scrcpy's audio playback stream into the virtual sink so the
/// remapped source carries phone audio instead of the speakers.
///
/// scrcpy (re)creates its sink input whenever the stream renegotiates,
/// so a one-shot move is followed by a background poller for as long as
/// the backend is active.
pub struct ScrcpyAudioRouter {
    pactl: Arc<Pactl>,
    sink_name: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScrcpyAudioRouter {
    pub fn new(pactl: Arc<Pactl>, sink_name: impl Into<String>) -> Self {
        Self {
            pactl,
            sink_name: sink_name.into(),
            task: Mutex::new(None),
        }
    }

    /// Bounded immediate move: probes for scrcpy sink inputs and moves
    /// every match, reporting what happened either way.
    pub async fn move_once(&self) -> Value {
        move_once(&self.pactl, &self.sink_name).await
    }

    /// Keep re-running the move while `active` stays true.
    pub fn start_background(&self, active: Arc<AtomicBool>) {
        self.stop_background();

        let pactl = Arc::clone(&self.pactl);
        let sink_name = self.sink_name.clone();
        let mut slot = self.task.lock().expect("router task lock poisoned");
        *slot = Some(tokio::spawn(async move {
            loop {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                move_once(&pactl, &sink_name).await;
                tokio::time::sleep(BACKGROUND_PERIOD).await;
            }
        }));
    }

    pub fn stop_background(&self) {
        if let Some(task) = self.task.lock().expect("router task lock poisoned").take() {
            task.abort();
        }
    }
}

async fn move_once(pactl: &Pactl, sink_name: &str) -> Value {
    if !pactl.available() {
        return json!({"moved": 0, "attempts": 0, "reason": "pactl_unavailable"});
    }

    let mut moved = 0;
    let mut attempts = 0;
    let mut last_error: Option<String> = None;

    for _ in 0..MOVE_PROBE_ROUNDS {
        attempts += 1;
        let sink_inputs = match pactl.list_sink_inputs().await {
            Ok(inputs) => inputs,
            Err(e) => {
                last_error = Some(e.to_string());
                tokio::time::sleep(MOVE_PROBE_DELAY).await;
                continue;
            }
        };

        let scrcpy_ids: Vec<String> = sink_inputs
            .iter()
            .filter(|entry| {
                let blob = format!(
                    "{} {} {}",
                    entry.properties.get("application.name").map(String::as_str).unwrap_or(""),
                    entry
                        .properties
                        .get("application.process.binary")
                        .map(String::as_str)
                        .unwrap_or(""),
                    entry.properties.get("media.name").map(String::as_str).unwrap_or(""),
                )
                .to_lowercase();
                blob.contains("scrcpy")
            })
            .map(|entry| entry.id.clone())
            .collect();

        if scrcpy_ids.is_empty() {
            tokio::time::sleep(MOVE_PROBE_DELAY).await;
            continue;
        }

        for id in &scrcpy_ids {
            match pactl.move_sink_input(id, sink_name).await {
                Ok(()) => moved += 1,
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        debug!("Routed {} scrcpy sink input(s) into {}", moved, sink_name);
        return json!({
            "moved": moved,
            "attempts": attempts,
            "matched": scrcpy_ids.len(),
            "error": last_error,
        });
    }

    json!({"moved": moved, "attempts": attempts, "matched": 0, "error": last_error})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_pactl_short_circuits() {
        let router = ScrcpyAudioRouter::new(Arc::new(Pactl::unavailable()), "vcam_sink");
        let result = router.move_once().await;
        assert_eq!(result["moved"], 0);
        assert_eq!(result["reason"], "pactl_unavailable");
    }

    #[tokio::test]
    async fn stop_background_without_start_is_noop() {
        let router = ScrcpyAudioRouter::new(Arc::new(Pactl::unavailable()), "vcam_sink");
        router.stop_background();
    }

    #[tokio::test]
    async fn background_loop_exits_when_deactivated() {
        let router = ScrcpyAudioRouter::new(Arc::new(Pactl::unavailable()), "vcam_sink");
        let active = Arc::new(AtomicBool::new(false));
        router.start_background(Arc::clone(&active));
        tokio::time::sleep(Duration::from_millis(50)).await;
        router.stop_background();
    }
}

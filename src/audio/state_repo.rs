use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Persists minimal audio recovery state to disk so a stop after a
/// daemon restart can still clean up modules loaded by a previous run.
pub struct AudioStateRepository {
    state_file: PathBuf,
}

impl AudioStateRepository {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    /// Tolerant load: missing or corrupt files read as empty state.
    pub fn load(&self) -> Value {
        let Ok(content) = std::fs::read_to_string(&self.state_file) else {
            return Value::Object(serde_json::Map::new());
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(value) if value.is_object() => value,
            _ => Value::Object(serde_json::Map::new()),
        }
    }

    pub fn save(&self, data: &Value) {
        if let Some(parent) = self.state_file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create audio state dir: {}", e);
                return;
            }
        }
        let content = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = std::fs::write(&self.state_file, content) {
            warn!("Failed to persist audio state: {}", e);
        }
    }

    pub fn clear(&self) {
        if self.state_file.exists() {
            let _ = std::fs::remove_file(&self.state_file);
        }
    }
}

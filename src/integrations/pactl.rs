use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;

use crate::error::{AppError, Result};

/// One row of `pactl list short modules`.
#[derive(Debug, Clone)]
pub struct PactlModule {
    pub id: String,
    pub name: String,
    pub args: String,
}

/// One entry of `pactl list sink-inputs`.
#[derive(Debug, Clone)]
pub struct SinkInput {
    pub id: String,
    pub sink: Option<String>,
    pub properties: HashMap<String, String>,
}

/// PulseAudio-compatible control tool (works against PipeWire's
/// pulse compatibility layer too). All invocations run under LC_ALL=C
/// so output parsing is locale-independent.
pub struct Pactl {
    pactl_bin: Option<PathBuf>,
}

impl Pactl {
    pub fn new() -> Self {
        Self {
            pactl_bin: which::which("pactl").ok(),
        }
    }

    pub fn with_binary(pactl_bin: impl Into<PathBuf>) -> Self {
        Self {
            pactl_bin: Some(pactl_bin.into()),
        }
    }

    pub fn available(&self) -> bool {
        self.pactl_bin.is_some()
    }

    #[cfg(test)]
    pub(crate) fn unavailable() -> Self {
        Self { pactl_bin: None }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let pactl = self.pactl_bin.as_ref().ok_or_else(|| {
            AppError::dependency_missing("pactl is missing")
                .with_details(json!({"tool": "pactl", "package": "pulseaudio-utils"}))
        })?;

        let output = Command::new(pactl)
            .args(args)
            .env("LC_ALL", "C")
            .env("LANG", "C")
            .output()
            .await
            .map_err(|e| AppError::backend_failed(format!("pactl failed to run: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let message = if !stderr.is_empty() { stderr } else { stdout };
            return Err(AppError::backend_failed(if message.is_empty() {
                format!("pactl {} failed", args.first().unwrap_or(&""))
            } else {
                message
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Load a module and return its id.
    pub async fn load_module(&self, name: &str, args: &[String]) -> Result<u32> {
        let mut argv = vec!["load-module", name];
        argv.extend(args.iter().map(String::as_str));
        let stdout = self.run(&argv).await?;
        stdout.trim().parse().map_err(|_| {
            AppError::backend_failed("pactl load-module returned a non-numeric id")
                .with_details(json!({"module": name, "output": stdout.trim()}))
        })
    }

    /// Best-effort unload; an already-gone module is not an error.
    pub async fn unload_module(&self, module_id: u32) {
        let id = module_id.to_string();
        let _ = self.run(&["unload-module", &id]).await;
    }

    pub async fn list_modules(&self) -> Result<Vec<PactlModule>> {
        let stdout = self.run(&["list", "short", "modules"]).await?;
        Ok(parse_short_modules(&stdout))
    }

    pub async fn list_sink_inputs(&self) -> Result<Vec<SinkInput>> {
        let stdout = self.run(&["list", "sink-inputs"]).await?;
        Ok(parse_sink_inputs(&stdout))
    }

    pub async fn move_sink_input(&self, sink_input_id: &str, sink_name: &str) -> Result<()> {
        self.run(&["move-sink-input", sink_input_id, sink_name])
            .await?;
        Ok(())
    }
}

impl Default for Pactl {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_short_modules(stdout: &str) -> Vec<PactlModule> {
    let mut modules = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let (Some(id), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        modules.push(PactlModule {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            args: parts.next().unwrap_or("").trim().to_string(),
        });
    }
    modules
}

fn parse_sink_inputs(stdout: &str) -> Vec<SinkInput> {
    let mut inputs = Vec::new();
    let mut current: Option<SinkInput> = None;
    let mut in_props = false;

    for raw in stdout.lines() {
        let stripped = raw.trim();
        if stripped.is_empty() {
            continue;
        }
        if let Some(id) = stripped.strip_prefix("Sink Input #") {
            if let Some(done) = current.take() {
                inputs.push(done);
            }
            current = Some(SinkInput {
                id: id.trim().to_string(),
                sink: None,
                properties: HashMap::new(),
            });
            in_props = false;
            continue;
        }
        let Some(ref mut entry) = current else {
            continue;
        };
        if let Some(sink) = stripped.strip_prefix("Sink:") {
            entry.sink = Some(sink.trim().to_string());
            continue;
        }
        if stripped.starts_with("Properties:") {
            in_props = true;
            continue;
        }
        if in_props {
            // Expected format: key = "value"; anything else means the
            // property block ended.
            let Some((key, value)) = stripped.split_once(" = ") else {
                in_props = false;
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            entry.properties.insert(key.trim().to_string(), value);
        }
    }

    if let Some(done) = current {
        inputs.push(done);
    }
    inputs
}

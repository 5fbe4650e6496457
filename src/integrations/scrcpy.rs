use std::path::PathBuf;

use crate::video::{CameraFacing, VALID_ROTATIONS};

/// Quality preset for the scrcpy camera bridge.
#[derive(Debug, Clone, Copy)]
pub struct ScrcpyPreset {
    pub video_bit_rate: &'static str,
    pub max_size: Option<u32>,
    pub max_fps: Option<u32>,
    pub v4l2_buffer: u32,
}

const PRESET_LOW_LATENCY: ScrcpyPreset = ScrcpyPreset {
    video_bit_rate: "6M",
    max_size: None,
    max_fps: Some(30),
    v4l2_buffer: 200,
};

const PRESET_BALANCED: ScrcpyPreset = ScrcpyPreset {
    video_bit_rate: "8M",
    max_size: Some(1080),
    max_fps: None,
    v4l2_buffer: 400,
};

const PRESET_HIGH_QUALITY: ScrcpyPreset = ScrcpyPreset {
    video_bit_rate: "12M",
    max_size: Some(1440),
    max_fps: None,
    v4l2_buffer: 600,
};

/// Builds scrcpy invocations that bridge a phone camera into a v4l2 sink.
pub struct ScrcpyLauncher {
    scrcpy_bin: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraCommandSpec<'a> {
    pub serial: &'a str,
    pub sink_path: &'a str,
    pub preset: &'a str,
    pub camera_facing: Option<CameraFacing>,
    pub camera_rotation: Option<u16>,
    pub preview_window: bool,
    pub enable_audio: bool,
}

impl ScrcpyLauncher {
    pub fn new() -> Self {
        Self {
            scrcpy_bin: which::which("scrcpy").ok(),
        }
    }

    pub fn with_binary(scrcpy_bin: impl Into<PathBuf>) -> Self {
        Self {
            scrcpy_bin: Some(scrcpy_bin.into()),
        }
    }

    pub fn available(&self) -> bool {
        self.scrcpy_bin.is_some()
    }

    pub fn preset(name: &str) -> ScrcpyPreset {
        match name {
            "low_latency" => PRESET_LOW_LATENCY,
            "high_quality" => PRESET_HIGH_QUALITY,
            _ => PRESET_BALANCED,
        }
    }

    pub fn command_for_android_camera(&self, spec: &CameraCommandSpec<'_>) -> Option<Vec<String>> {
        let scrcpy = self.scrcpy_bin.as_ref()?;

        let mut cmd = vec![
            scrcpy.display().to_string(),
            "-s".to_string(),
            spec.serial.to_string(),
            "--video-source=camera".to_string(),
            format!("--v4l2-sink={}", spec.sink_path),
        ];

        if spec.preview_window {
            cmd.extend(
                [
                    "--window-title=VCam Preview",
                    "--window-width=640",
                    "--window-height=360",
                    "--no-control",
                ]
                .map(String::from),
            );
        } else {
            cmd.push("--no-window".to_string());
        }

        if let Some(facing) = spec.camera_facing {
            cmd.push(format!("--camera-facing={}", facing.as_str()));
        }

        if let Some(rotation) = spec.camera_rotation {
            if VALID_ROTATIONS.contains(&rotation) {
                cmd.push(format!("--capture-orientation={rotation}"));
            }
        }

        cmd.push("--camera-ar=16:9".to_string());

        if spec.enable_audio {
            cmd.push("--audio-source=mic".to_string());
        } else {
            cmd.push("--no-audio".to_string());
        }

        let preset = Self::preset(spec.preset);
        cmd.push(format!("--video-bit-rate={}", preset.video_bit_rate));
        if let Some(max_size) = preset.max_size {
            cmd.push(format!("--max-size={max_size}"));
        }
        if let Some(max_fps) = preset.max_fps {
            cmd.push(format!("--max-fps={max_fps}"));
        }
        cmd.push(format!("--v4l2-buffer={}", preset.v4l2_buffer));

        Some(cmd)
    }
}

impl Default for ScrcpyLauncher {
    fn default() -> Self {
        Self::new()
    }
}

//! Adapters around the external CLI tools the daemon orchestrates.
//!
//! Each adapter discovers its binary once, shells out per call, and
//! translates tool output into typed values. Policy lives in the
//! managers; these stay mechanical.

pub mod adb;
pub mod pactl;
pub mod pipewire;
pub mod scrcpy;
pub mod v4l2;

pub use adb::{AdbAdapter, AdbDevice};
pub use pactl::{Pactl, PactlModule, SinkInput};
pub use pipewire::PipeWire;
pub use scrcpy::{CameraCommandSpec, ScrcpyLauncher};
pub use v4l2::V4l2Loopback;

//! vcamd turns an Android phone's camera and microphone into a virtual
//! webcam and microphone on a Linux desktop by supervising external
//! tools (`adb`, `scrcpy`, PulseAudio/PipeWire tooling, the privileged
//! v4l2loopback helper) and keeping their lifecycles consistent despite
//! phones disconnecting and processes crashing.

pub mod audio;
pub mod backends;
pub mod daemon;
pub mod error;
pub mod helper;
pub mod integrations;
pub mod paths;
pub mod user_config;
pub mod video;

pub use daemon::VcamDaemon;
pub use error::{AppError, ErrorKind, Result};

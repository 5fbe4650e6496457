//! Video subsystem: one android-camera session bridged into the
//! v4l2loopback device, kept alive by a bounded reconnect watch.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                VideoManager                 │  one mutex
//! ├──────────────┬──────────────┬───────────────┤
//! │  Session     │  Reconnect   │  DeviceReset  │
//! │  (start/stop)│  (watch loop)│  (helper)     │
//! ├──────────────┴──────────────┴───────────────┤
//! │     ProcessSupervisor   │   StateStore      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod device_reset;
pub mod manager;
pub mod reconnect;
pub mod session;
pub mod types;

pub use device_reset::DeviceResetService;
pub use manager::{VideoManager, VideoRuntimeStatus, VideoStartRequest};
pub use reconnect::ReconnectController;
pub use session::{VideoSessionService, VIDEO_PROC_NAME};
pub use types::{
    CameraFacing, ReconnectPolicy, ReconnectState, ReconnectStatus, VideoSource,
    VideoStartOptions, VideoStartOutcome, VideoStopOutcome, VALID_ROTATIONS,
};

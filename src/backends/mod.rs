pub mod android;

pub use android::{AndroidVideoBackend, LaunchSpec, SourceInfo, VideoBackend};

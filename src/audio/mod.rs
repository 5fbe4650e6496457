//! Microphone bridging: expose the phone's mic (carried in scrcpy's
//! audio stream) as a virtual source other applications can record from.

pub mod backend;
pub mod manager;
pub mod pipewire_backend;
pub mod router;
pub mod snd_aloop;
pub mod state_repo;

pub use backend::AudioBackend;
pub use manager::{AudioManager, VIRTUAL_SINK_NAME, VIRTUAL_SOURCE_NAME};
pub use pipewire_backend::PipeWireAudioBackend;
pub use router::ScrcpyAudioRouter;
pub use snd_aloop::SndAloopBackend;
pub use state_repo::AudioStateRepository;

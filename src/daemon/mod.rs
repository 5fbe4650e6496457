//! Daemon core: the subsystem state store, the supervised-process
//! lifecycle manager, and the composition root that wires the managers
//! together for one daemon run.
//!
//! Both singletons here (`StateStore`, `ProcessSupervisor`) are
//! explicitly constructed and handed to the managers by reference, so
//! everything above them can be tested against fakes.

pub mod runtime;
pub mod state;
pub mod supervisor;

pub use runtime::VcamDaemon;
pub use state::{StateStore, StatusSnapshot, SubsystemState, SubsystemStatus};
pub use supervisor::{ManagedProcess, ProcessSupervisor};

//! Host backends: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for talking to the window
//! manager: answering window/display queries, applying geometry, and emitting
//! HostEvent(s) for connected signals. They MUST NOT decide when to save or
//! restore; all of that belongs to the lifecycle tracker and its services.

mod command;
mod dry_run;
mod simulated;
mod r#trait;
mod x11;

pub use self::r#trait::{
    create_host_backend, AppIdentity, GlobalSignal, HostBackend, HostBridge, SubscriptionId,
    WindowManager, WindowSignal,
};
pub use self::simulated::{SimWindow, SimulatedHost};

pub mod admin;
pub mod geometry_store;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod reconciler;
pub mod restore_scheduler;
pub mod runtime;
pub mod save_debouncer;
pub mod timers;

pub use admin::StoreAdmin;
pub use geometry_store::GeometryStore;
pub use host::create_host_backend;
pub use lifecycle::LifecycleTracker;
pub use runtime::run_event_loop;
pub use timers::TokioTimers;

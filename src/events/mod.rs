pub mod window;

pub use window::{
    Axis, HostEvent, MaximizeState, Rect, WindowEvent, WindowEventType, WindowId, WindowType,
};

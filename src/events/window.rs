use serde::{Deserialize, Serialize};
use std::fmt;

/// Непрозрачный идентификатор окна, выданный хостом (X11 id, счётчик симулятора и т.п.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Тип окна с точки зрения оконного менеджера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowType {
    Normal,
    Dialog,
    Utility,
    Other,
}

/// Прямоугольник в координатах экрана
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Все стороны отличаются не больше чем на `slack` пикселей
    pub fn is_close_to(&self, other: &Rect, slack: i32) -> bool {
        (self.x - other.x).abs() <= slack
            && (self.y - other.y).abs() <= slack
            && (self.width - other.width).abs() <= slack
            && (self.height - other.height).abs() <= slack
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Лежит ли `other` целиком внутри прямоугольника
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let rect = Rect::new(x, y, right - x, bottom - y);
        (!rect.is_empty()).then_some(rect)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Ось максимизации
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Состояние максимизации по обеим осям. Используется и как набор осей для `unmaximize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MaximizeState {
    pub horizontal: bool,
    pub vertical: bool,
}

impl MaximizeState {
    pub const NONE: Self = Self {
        horizontal: false,
        vertical: false,
    };
    pub const BOTH: Self = Self {
        horizontal: true,
        vertical: true,
    };

    pub fn is_any(&self) -> bool {
        self.horizontal || self.vertical
    }

    pub fn axis(&self, axis: Axis) -> bool {
        match axis {
            Axis::Horizontal => self.horizontal,
            Axis::Vertical => self.vertical,
        }
    }
}

/// Событие жизненного цикла конкретного окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub window: WindowId,
    pub timestamp: std::time::Instant,
    pub event_type: WindowEventType,
}

impl WindowEvent {
    pub fn new(window: WindowId, event_type: WindowEventType) -> Self {
        Self {
            window,
            timestamp: std::time::Instant::now(),
            event_type,
        }
    }

    pub fn created(window: WindowId) -> Self {
        Self::new(window, WindowEventType::Created)
    }

    pub fn mapped(window: WindowId) -> Self {
        Self::new(window, WindowEventType::Mapped)
    }

    pub fn unmanaging(window: WindowId) -> Self {
        Self::new(window, WindowEventType::Unmanaging)
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} ({}ms ago)",
            self.event_type,
            self.window,
            self.timestamp.elapsed().as_millis()
        )
    }
}

/// Тип события окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventType {
    Created,
    Mapped,
    Unmanaging,
    PositionChanged,
    SizeChanged,
}

/// Всё, что хост может сообщить циклу событий
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Window(WindowEvent),
    ActiveWorkspaceChanged(usize),
}

impl From<WindowEvent> for HostEvent {
    fn from(event: WindowEvent) -> Self {
        HostEvent::Window(event)
    }
}

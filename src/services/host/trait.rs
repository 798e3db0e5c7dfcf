use crate::config::Config;
use crate::error::Result;
use crate::events::{Axis, HostEvent, MaximizeState, Rect, WindowId, WindowType};
use std::fmt;

/// Сигналы конкретного окна, на которые подписывается трекер
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSignal {
    Unmanaging,
    PositionChanged,
    SizeChanged,
}

/// Глобальные сигналы дисплея
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalSignal {
    WindowCreated,
    WindowMapped,
    ActiveWorkspaceChanged,
}

/// Отзываемая ручка подписки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Мост к оконному менеджеру: запросы, изменения геометрии, данные о мониторах и подписки.
///
/// Все вызовы синхронные и не блокируют цикл событий надолго. Запросы к
/// уничтоженному окну возвращают `PositionerError::StaleReference`.
pub trait WindowManager {
    fn window_type(&self, window: WindowId) -> Result<WindowType>;
    fn maximized(&self, window: WindowId) -> Result<MaximizeState>;
    fn frame_rect(&self, window: WindowId) -> Result<Rect>;
    fn monitor_index(&self, window: WindowId) -> Result<usize>;
    fn is_alive(&self, window: WindowId) -> bool;
    /// Есть ли у окна видимая поверхность (актор композитора)
    fn surface_exists(&self, window: WindowId) -> Result<bool>;

    fn move_resize(&mut self, window: WindowId, rect: Rect) -> Result<()>;
    fn unmaximize(&mut self, window: WindowId, axes: MaximizeState) -> Result<()>;

    fn monitor_count(&self) -> usize;
    fn primary_monitor_index(&self) -> usize;
    /// Рабочая область монитора на активном рабочем столе (без панелей и доков)
    fn work_area_for_monitor(&self, index: usize) -> Result<Rect>;
    fn active_workspace(&self) -> usize;
    fn managed_windows(&self) -> Vec<WindowId>;

    fn connect(&mut self, window: WindowId, signal: WindowSignal) -> Result<SubscriptionId>;
    /// Отключение идемпотентно: неизвестная или уже снятая ручка игнорируется
    fn disconnect(&mut self, window: WindowId, id: SubscriptionId);
    fn connect_global(&mut self, signal: GlobalSignal) -> SubscriptionId;
    fn disconnect_global(&mut self, id: SubscriptionId);

    fn is_maximized(&self, window: WindowId, axis: Axis) -> Result<bool> {
        Ok(self.maximized(window)?.axis(axis))
    }
}

/// Мост к сведениям о приложении, которому принадлежит окно
pub trait AppIdentity {
    fn window_app_id(&self, window: WindowId) -> Option<String>;
    fn window_title(&self, window: WindowId) -> Option<String>;
}

/// Всё, что нужно сервисам от хоста
pub trait HostBridge: WindowManager + AppIdentity {}

impl<T: WindowManager + AppIdentity + ?Sized> HostBridge for T {}

/// Хост, умеющий отдавать события циклу событий
#[async_trait::async_trait]
pub trait HostBackend: HostBridge + Send {
    /// Дождаться следующей пачки событий (в порядке их возникновения)
    async fn next_events(&mut self) -> Result<Vec<HostEvent>>;

    fn name(&self) -> &'static str;
}

/// Factory function to create an appropriate host backend based on the dry_run flag
pub fn create_host_backend(config: &Config, dry_run: bool) -> Result<Box<dyn HostBackend>> {
    if dry_run || config.backend.mode == "dry_run" {
        Ok(Box::new(super::dry_run::dry_run_host(config)))
    } else {
        Ok(Box::new(super::x11::X11Host::new(config)?))
    }
}

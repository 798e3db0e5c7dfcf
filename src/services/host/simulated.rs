use crate::error::{PositionerError, Result};
use crate::events::{
    HostEvent, MaximizeState, Rect, WindowEvent, WindowEventType, WindowId, WindowType,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::info;

use super::dry_run::DemoScript;
use super::r#trait::{AppIdentity, GlobalSignal, HostBackend, SubscriptionId, WindowManager, WindowSignal};

/// Состояние окна в симуляторе
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimWindow {
    pub app_id: Option<String>,
    pub title: Option<String>,
    pub window_type: WindowType,
    pub rect: Rect,
    pub maximized: MaximizeState,
    pub mapped: bool,
    /// Оконный менеджер отвечает ошибкой на move_resize
    pub reject_moves: bool,
    /// Оконный менеджер молча игнорирует move_resize
    pub ignore_moves: bool,
}

impl SimWindow {
    pub fn new(app_id: &str, rect: Rect) -> Self {
        Self {
            app_id: Some(app_id.to_string()),
            title: None,
            window_type: WindowType::Normal,
            rect,
            maximized: MaximizeState::NONE,
            mapped: false,
            reject_moves: false,
            ignore_moves: false,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_type(mut self, window_type: WindowType) -> Self {
        self.window_type = window_type;
        self
    }

    #[cfg(test)]
    pub fn without_identity(mut self) -> Self {
        self.app_id = None;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Subscription {
    Window(WindowId, WindowSignal),
    Global(GlobalSignal),
}

/// Оконный менеджер в памяти: используется в режиме сухого запуска и в тестах.
///
/// События ставятся в очередь только при наличии соответствующей подписки,
/// как это делает настоящий оконный менеджер.
pub struct SimulatedHost {
    windows: BTreeMap<WindowId, SimWindow>,
    work_areas: Vec<Rect>,
    primary: usize,
    workspace: usize,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_subscription: u64,
    next_window: u64,
    queued: VecDeque<HostEvent>,
    #[allow(dead_code)]
    moves: Vec<(WindowId, Rect)>,
    #[allow(dead_code)]
    unmaximized: Vec<WindowId>,
    pub(super) demo: Option<DemoScript>,
}

impl SimulatedHost {
    /// Хост с мониторами, заданными рабочими областями
    pub fn new(work_areas: Vec<Rect>) -> Self {
        Self {
            windows: BTreeMap::new(),
            work_areas,
            primary: 0,
            workspace: 0,
            subscriptions: HashMap::new(),
            next_subscription: 0,
            next_window: 0,
            queued: VecDeque::new(),
            moves: Vec::new(),
            unmaximized: Vec::new(),
            demo: None,
        }
    }

    #[cfg(test)]
    pub fn set_work_areas(&mut self, work_areas: Vec<Rect>) {
        self.work_areas = work_areas;
    }

    #[cfg(test)]
    pub fn window_mut(&mut self, window: WindowId) -> Option<&mut SimWindow> {
        self.windows.get_mut(&window)
    }

    /// Успешные вызовы move_resize в порядке поступления
    #[cfg(test)]
    pub fn moves(&self) -> &[(WindowId, Rect)] {
        &self.moves
    }

    #[cfg(test)]
    pub fn unmaximized(&self) -> &[WindowId] {
        &self.unmaximized
    }

    #[cfg(test)]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[cfg(test)]
    pub fn window_subscription_count(&self, window: WindowId) -> usize {
        self.subscriptions
            .values()
            .filter(|s| matches!(s, Subscription::Window(w, _) if *w == window))
            .count()
    }

    pub fn drain_events(&mut self) -> Vec<HostEvent> {
        self.queued.drain(..).collect()
    }

    /// Новое окно (ещё без поверхности)
    pub fn create_window(&mut self, window: SimWindow) -> WindowId {
        self.next_window += 1;
        let id = WindowId(self.next_window);
        self.windows.insert(id, window);
        if self.has_global(GlobalSignal::WindowCreated) {
            self.queued.push_back(WindowEvent::created(id).into());
        }
        id
    }

    /// Окно получило поверхность и отображено
    pub fn map_window(&mut self, window: WindowId) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.mapped = true;
            if self.has_global(GlobalSignal::WindowMapped) {
                self.queued.push_back(WindowEvent::mapped(window).into());
            }
        }
    }

    /// Пользователь двигает/меняет размер окна
    pub fn user_move(&mut self, window: WindowId, rect: Rect) {
        self.set_rect(window, rect);
    }

    #[cfg(test)]
    pub fn set_maximized(&mut self, window: WindowId, maximized: MaximizeState) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.maximized = maximized;
        }
    }

    /// Оконный менеджер снимает окно с управления: сигнал уходит до удаления
    pub fn destroy_window(&mut self, window: WindowId) {
        if self.has_window_signal(window, WindowSignal::Unmanaging) {
            self.queued.push_back(WindowEvent::unmanaging(window).into());
        }
    }

    /// Окончательно освободить окно (после обработки `Unmanaging`)
    pub fn finalize_window(&mut self, window: WindowId) {
        self.windows.remove(&window);
    }

    #[cfg(test)]
    pub fn switch_workspace(&mut self, workspace: usize) {
        self.workspace = workspace;
        if self.has_global(GlobalSignal::ActiveWorkspaceChanged) {
            self.queued
                .push_back(HostEvent::ActiveWorkspaceChanged(workspace));
        }
    }

    fn set_rect(&mut self, window: WindowId, rect: Rect) {
        let Some(w) = self.windows.get_mut(&window) else {
            return;
        };
        let old = w.rect;
        w.rect = rect;

        if (old.x, old.y) != (rect.x, rect.y)
            && self.has_window_signal(window, WindowSignal::PositionChanged)
        {
            self.queued.push_back(
                WindowEvent::new(window, WindowEventType::PositionChanged).into(),
            );
        }
        if (old.width, old.height) != (rect.width, rect.height)
            && self.has_window_signal(window, WindowSignal::SizeChanged)
        {
            self.queued
                .push_back(WindowEvent::new(window, WindowEventType::SizeChanged).into());
        }
    }

    fn has_global(&self, signal: GlobalSignal) -> bool {
        self.subscriptions
            .values()
            .any(|s| matches!(s, Subscription::Global(g) if *g == signal))
    }

    fn has_window_signal(&self, window: WindowId, signal: WindowSignal) -> bool {
        self.subscriptions
            .values()
            .any(|s| matches!(s, Subscription::Window(w, sig) if *w == window && *sig == signal))
    }

    fn get(&self, window: WindowId) -> Result<&SimWindow> {
        self.windows
            .get(&window)
            .ok_or(PositionerError::StaleReference(window))
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }
}

impl WindowManager for SimulatedHost {
    fn window_type(&self, window: WindowId) -> Result<WindowType> {
        Ok(self.get(window)?.window_type)
    }

    fn maximized(&self, window: WindowId) -> Result<MaximizeState> {
        Ok(self.get(window)?.maximized)
    }

    fn frame_rect(&self, window: WindowId) -> Result<Rect> {
        Ok(self.get(window)?.rect)
    }

    fn monitor_index(&self, window: WindowId) -> Result<usize> {
        let (cx, cy) = self.get(window)?.rect.center();
        Ok(self
            .work_areas
            .iter()
            .position(|area| area.contains_point(cx, cy))
            .unwrap_or(self.primary))
    }

    fn is_alive(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    fn surface_exists(&self, window: WindowId) -> Result<bool> {
        Ok(self.get(window)?.mapped)
    }

    fn move_resize(&mut self, window: WindowId, rect: Rect) -> Result<()> {
        let w = self.get(window)?;
        if w.reject_moves {
            return Err(PositionerError::rejected(window, "перемещение запрещено"));
        }
        if !w.ignore_moves {
            self.set_rect(window, rect);
        }
        self.moves.push((window, rect));
        Ok(())
    }

    fn unmaximize(&mut self, window: WindowId, axes: MaximizeState) -> Result<()> {
        let w = self
            .windows
            .get_mut(&window)
            .ok_or(PositionerError::StaleReference(window))?;
        if axes.horizontal {
            w.maximized.horizontal = false;
        }
        if axes.vertical {
            w.maximized.vertical = false;
        }
        self.unmaximized.push(window);
        Ok(())
    }

    fn monitor_count(&self) -> usize {
        self.work_areas.len()
    }

    fn primary_monitor_index(&self) -> usize {
        self.primary
    }

    fn work_area_for_monitor(&self, index: usize) -> Result<Rect> {
        self.work_areas
            .get(index)
            .copied()
            .ok_or_else(|| crate::positioner_error!(geometry, "монитор {} не существует", index))
    }

    fn active_workspace(&self) -> usize {
        self.workspace
    }

    fn managed_windows(&self) -> Vec<WindowId> {
        self.windows.keys().copied().collect()
    }

    fn connect(&mut self, window: WindowId, signal: WindowSignal) -> Result<SubscriptionId> {
        self.get(window)?;
        let id = self.next_subscription_id();
        self.subscriptions
            .insert(id, Subscription::Window(window, signal));
        Ok(id)
    }

    fn disconnect(&mut self, _window: WindowId, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }

    fn connect_global(&mut self, signal: GlobalSignal) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.subscriptions.insert(id, Subscription::Global(signal));
        id
    }

    fn disconnect_global(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }
}

impl AppIdentity for SimulatedHost {
    fn window_app_id(&self, window: WindowId) -> Option<String> {
        self.windows.get(&window).and_then(|w| w.app_id.clone())
    }

    fn window_title(&self, window: WindowId) -> Option<String> {
        self.windows.get(&window).and_then(|w| w.title.clone())
    }
}

#[async_trait::async_trait]
impl HostBackend for SimulatedHost {
    async fn next_events(&mut self) -> Result<Vec<HostEvent>> {
        loop {
            if !self.queued.is_empty() {
                return Ok(self.drain_events());
            }

            // Сценарий остаётся в хосте, пока идёт ожидание: future отменяется в select!
            match self.demo.as_mut() {
                Some(demo) => demo.tick().await,
                None => {
                    info!("Симулятор: событий больше не будет");
                    std::future::pending::<()>().await;
                }
            }

            if let Some(mut demo) = self.demo.take() {
                demo.step(self);
                self.demo = Some(demo);
            }
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SimulatedHost {
        SimulatedHost::new(vec![
            Rect::new(0, 0, 1920, 1080),
            Rect::new(1920, 0, 2560, 1440),
        ])
    }

    fn kinds(events: &[HostEvent]) -> Vec<(WindowId, WindowEventType)> {
        events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Window(w) => Some((w.window, w.event_type)),
                HostEvent::ActiveWorkspaceChanged(_) => None,
            })
            .collect()
    }

    #[test]
    fn events_require_subscriptions() {
        let mut host = host();
        host.create_window(SimWindow::new("org.gnome.Terminal", Rect::new(0, 0, 800, 600)));
        assert!(host.drain_events().is_empty());

        host.connect_global(GlobalSignal::WindowCreated);
        let window = host.create_window(SimWindow::new("firefox", Rect::new(0, 0, 800, 600)));
        assert_eq!(
            kinds(&host.drain_events()),
            vec![(window, WindowEventType::Created)]
        );

        // Без подписки на сигналы окна перемещение проходит молча
        host.user_move(window, Rect::new(10, 10, 800, 600));
        assert!(host.drain_events().is_empty());

        host.connect(window, WindowSignal::PositionChanged).unwrap();
        host.connect(window, WindowSignal::SizeChanged).unwrap();
        host.user_move(window, Rect::new(20, 20, 900, 600));
        assert_eq!(
            kinds(&host.drain_events()),
            vec![
                (window, WindowEventType::PositionChanged),
                (window, WindowEventType::SizeChanged),
            ]
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut host = host();
        let window = host.create_window(SimWindow::new("firefox", Rect::new(0, 0, 800, 600)));
        let id = host.connect(window, WindowSignal::Unmanaging).unwrap();
        assert_eq!(host.window_subscription_count(window), 1);

        host.disconnect(window, id);
        host.disconnect(window, id);
        assert_eq!(host.window_subscription_count(window), 0);
    }

    #[test]
    fn queries_on_finalized_window_are_stale() {
        let mut host = host();
        let window = host.create_window(SimWindow::new("firefox", Rect::new(0, 0, 800, 600)));
        host.finalize_window(window);

        assert!(!host.is_alive(window));
        assert!(matches!(
            host.frame_rect(window),
            Err(PositionerError::StaleReference(w)) if w == window
        ));
        assert!(host.connect(window, WindowSignal::SizeChanged).is_err());
    }

    #[test]
    fn monitor_index_follows_window_center() {
        let mut host = host();
        let window = host.create_window(SimWindow::new("firefox", Rect::new(2000, 100, 800, 600)));
        assert_eq!(host.monitor_index(window).unwrap(), 1);

        host.user_move(window, Rect::new(100, 100, 800, 600));
        assert_eq!(host.monitor_index(window).unwrap(), 0);
    }
}

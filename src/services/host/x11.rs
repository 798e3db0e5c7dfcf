use crate::config::Config;
use crate::error::{PositionerError, Result};
use crate::events::{
    HostEvent, MaximizeState, Rect, WindowEvent, WindowEventType, WindowId, WindowType,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::command::run_tool;
use super::r#trait::{AppIdentity, GlobalSignal, HostBackend, SubscriptionId, WindowManager, WindowSignal};

/// Строка вывода `wmctrl -lGx`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedWindow {
    pub id: WindowId,
    pub desktop: i64,
    pub rect: Rect,
    pub wm_class: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    pub rect: Rect,
    pub primary: bool,
}

#[derive(Debug)]
struct TrackedWindow {
    listed: ListedWindow,
    /// Окно пропало из списка: читается до следующего опроса, чтобы успеть сохранить геометрию
    departing: bool,
}

/// Оконный менеджер X11 через wmctrl/xprop/xrandr.
///
/// Сигналов X11 у утилит нет, поэтому события синтезируются сравнением
/// снимков `wmctrl -lGx` между опросами.
pub struct X11Host {
    interval: Interval,
    windows: HashMap<WindowId, TrackedWindow>,
    window_types: Mutex<HashMap<WindowId, WindowType>>,
    /// Последнее прочитанное `_NET_WM_STATE`: уходящее окно через xprop уже не прочитать
    wm_states: Mutex<HashMap<WindowId, MaximizeState>>,
    monitors: Vec<Monitor>,
    desktop_work_areas: Vec<Rect>,
    workspace: usize,
    window_subs: HashMap<SubscriptionId, (WindowId, WindowSignal)>,
    global_subs: HashMap<SubscriptionId, GlobalSignal>,
    next_subscription: u64,
}

impl X11Host {
    pub fn new(config: &Config) -> Result<Self> {
        info!("Инициализация X11Host");

        let mut timer = interval(Duration::from_millis(config.backend.polling_interval_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut host = Self {
            interval: timer,
            windows: HashMap::new(),
            window_types: Mutex::new(HashMap::new()),
            wm_states: Mutex::new(HashMap::new()),
            monitors: Vec::new(),
            desktop_work_areas: Vec::new(),
            workspace: 0,
            window_subs: HashMap::new(),
            global_subs: HashMap::new(),
            next_subscription: 0,
        };

        // Первый снимок: уже открытые окна не порождают событий создания
        let events = host.poll()?;
        debug!("Начальный снимок X11: {} окон, {} событий отброшено", host.windows.len(), events.len());
        info!("Обнаружено мониторов: {}", host.monitors.len());

        Ok(host)
    }

    fn poll(&mut self) -> Result<Vec<HostEvent>> {
        let listed = parse_wmctrl_windows(&run_tool("wmctrl", &["-lGx"])?);
        self.refresh_display();

        let workspace = run_tool("wmctrl", &["-d"])
            .ok()
            .and_then(|desktops| parse_active_desktop(&desktops));

        let (events, changed) = self.apply_snapshot(listed, workspace);
        // Окно могли развернуть между опросами: к моменту закрытия xprop его
        // уже не прочитает, поэтому состояние берётся сейчас
        for id in changed {
            self.refresh_wm_state(id);
        }
        Ok(events)
    }

    /// Сравнить новый снимок с прошлым. Возвращает события и окна, чья
    /// рамка изменилась при подписке на перемещение или размер.
    fn apply_snapshot(
        &mut self,
        listed: Vec<ListedWindow>,
        workspace: Option<usize>,
    ) -> (Vec<HostEvent>, Vec<WindowId>) {
        let departed: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.departing)
            .map(|(id, _)| *id)
            .collect();
        for id in departed {
            self.windows.remove(&id);
            self.window_types.lock().remove(&id);
            self.wm_states.lock().remove(&id);
        }

        let mut events = Vec::new();
        let mut changed = Vec::new();

        if let Some(workspace) = workspace {
            if workspace != self.workspace {
                self.workspace = workspace;
                if self.has_global(GlobalSignal::ActiveWorkspaceChanged) {
                    events.push(HostEvent::ActiveWorkspaceChanged(workspace));
                }
            }
        }

        let mut seen = HashSet::with_capacity(listed.len());
        for window in listed {
            let id = window.id;
            seen.insert(id);

            match self.windows.get_mut(&id) {
                Some(tracked) => {
                    let old = tracked.listed.rect;
                    let new = window.rect;
                    tracked.listed = window;

                    let mut moved = false;
                    if (old.x, old.y) != (new.x, new.y)
                        && self.has_window_signal(id, WindowSignal::PositionChanged)
                    {
                        events.push(WindowEvent::new(id, WindowEventType::PositionChanged).into());
                        moved = true;
                    }
                    if (old.width, old.height) != (new.width, new.height)
                        && self.has_window_signal(id, WindowSignal::SizeChanged)
                    {
                        events.push(WindowEvent::new(id, WindowEventType::SizeChanged).into());
                        moved = true;
                    }
                    if moved {
                        changed.push(id);
                    }
                }
                None => {
                    self.windows.insert(
                        id,
                        TrackedWindow {
                            listed: window,
                            departing: false,
                        },
                    );
                    // В списке wmctrl оказываются только уже отображённые окна
                    if self.has_global(GlobalSignal::WindowCreated) {
                        events.push(WindowEvent::created(id).into());
                    }
                    if self.has_global(GlobalSignal::WindowMapped) {
                        events.push(WindowEvent::mapped(id).into());
                    }
                }
            }
        }

        let gone: Vec<WindowId> = self
            .windows
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(tracked) = self.windows.get_mut(&id) {
                tracked.departing = true;
            }
            if self.has_window_signal(id, WindowSignal::Unmanaging) {
                events.push(WindowEvent::unmanaging(id).into());
            }
        }

        (events, changed)
    }

    /// Перечитать `_NET_WM_STATE` окна в кэш. Ошибка не страшна: окно,
    /// скорее всего, уже закрывается, и останется прошлое значение.
    fn refresh_wm_state(&self, window: WindowId) {
        match run_tool("xprop", &["-id", &window_arg(window), "_NET_WM_STATE"]) {
            Ok(output) => {
                self.cache_wm_state(window, &output);
            }
            Err(e) => debug!("Окно {}: состояние не прочитано: {}", window, e),
        }
    }

    fn cache_wm_state(&self, window: WindowId, output: &str) -> MaximizeState {
        let state = parse_wm_state(output);
        self.wm_states.lock().insert(window, state);
        state
    }

    fn refresh_display(&mut self) {
        match run_tool("xrandr", &["--listmonitors"]) {
            Ok(output) => {
                let monitors = parse_xrandr_monitors(&output);
                if !monitors.is_empty() {
                    if monitors.len() != self.monitors.len() {
                        info!("Конфигурация мониторов изменилась: {} -> {}", self.monitors.len(), monitors.len());
                    }
                    self.monitors = monitors;
                }
            }
            Err(e) => warn!("Не удалось получить список мониторов: {}", e),
        }

        if let Ok(output) = run_tool("xprop", &["-root", "_NET_WORKAREA"]) {
            self.desktop_work_areas = parse_workarea(&output);
        }
    }

    fn tracked(&self, window: WindowId) -> Result<&TrackedWindow> {
        self.windows
            .get(&window)
            .ok_or(PositionerError::StaleReference(window))
    }

    fn has_global(&self, signal: GlobalSignal) -> bool {
        self.global_subs.values().any(|s| *s == signal)
    }

    fn has_window_signal(&self, window: WindowId, signal: WindowSignal) -> bool {
        self.window_subs
            .values()
            .any(|(w, s)| *w == window && *s == signal)
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }
}

fn window_arg(window: WindowId) -> String {
    format!("0x{:08x}", window.0)
}

impl WindowManager for X11Host {
    fn window_type(&self, window: WindowId) -> Result<WindowType> {
        self.tracked(window)?;
        if let Some(window_type) = self.window_types.lock().get(&window) {
            return Ok(*window_type);
        }

        let output = run_tool("xprop", &["-id", &window_arg(window), "_NET_WM_WINDOW_TYPE"])
            .map_err(|_| PositionerError::StaleReference(window))?;
        let window_type = parse_window_type(&output);
        self.window_types.lock().insert(window, window_type);
        Ok(window_type)
    }

    fn maximized(&self, window: WindowId) -> Result<MaximizeState> {
        if self.tracked(window)?.departing {
            return self
                .wm_states
                .lock()
                .get(&window)
                .copied()
                .ok_or(PositionerError::StaleReference(window));
        }

        let output = run_tool("xprop", &["-id", &window_arg(window), "_NET_WM_STATE"])
            .map_err(|_| PositionerError::StaleReference(window))?;
        Ok(self.cache_wm_state(window, &output))
    }

    fn frame_rect(&self, window: WindowId) -> Result<Rect> {
        Ok(self.tracked(window)?.listed.rect)
    }

    fn monitor_index(&self, window: WindowId) -> Result<usize> {
        let (cx, cy) = self.tracked(window)?.listed.rect.center();
        Ok(self
            .monitors
            .iter()
            .position(|m| m.rect.contains_point(cx, cy))
            .unwrap_or_else(|| self.primary_monitor_index()))
    }

    fn is_alive(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    fn surface_exists(&self, window: WindowId) -> Result<bool> {
        let tracked = self.tracked(window)?;
        Ok(!tracked.departing && !tracked.listed.rect.is_empty())
    }

    fn move_resize(&mut self, window: WindowId, rect: Rect) -> Result<()> {
        self.tracked(window)?;
        let geometry = format!("0,{},{},{},{}", rect.x, rect.y, rect.width, rect.height);
        run_tool("wmctrl", &["-i", "-r", &window_arg(window), "-e", &geometry])
            .map(|_| ())
            .map_err(|e| PositionerError::rejected(window, e.to_string()))
    }

    fn unmaximize(&mut self, window: WindowId, axes: MaximizeState) -> Result<()> {
        self.tracked(window)?;
        let mut props = vec!["remove"];
        if axes.vertical {
            props.push("maximized_vert");
        }
        if axes.horizontal {
            props.push("maximized_horz");
        }
        let props = props.join(",");
        run_tool("wmctrl", &["-i", "-r", &window_arg(window), "-b", &props])
            .map(|_| ())
            .map_err(|e| PositionerError::rejected(window, e.to_string()))
    }

    fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    fn primary_monitor_index(&self) -> usize {
        self.monitors.iter().position(|m| m.primary).unwrap_or(0)
    }

    fn work_area_for_monitor(&self, index: usize) -> Result<Rect> {
        let monitor = self
            .monitors
            .get(index)
            .ok_or_else(|| crate::positioner_error!(geometry, "монитор {} не существует", index))?;

        // _NET_WORKAREA описывает общую область рабочего стола; пересекаем с монитором
        let desktop_area = self
            .desktop_work_areas
            .get(self.workspace)
            .or_else(|| self.desktop_work_areas.first());

        Ok(desktop_area
            .and_then(|area| area.intersect(&monitor.rect))
            .unwrap_or(monitor.rect))
    }

    fn active_workspace(&self) -> usize {
        self.workspace
    }

    fn managed_windows(&self) -> Vec<WindowId> {
        self.windows
            .iter()
            .filter(|(_, w)| !w.departing)
            .map(|(id, _)| *id)
            .collect()
    }

    fn connect(&mut self, window: WindowId, signal: WindowSignal) -> Result<SubscriptionId> {
        self.tracked(window)?;
        // Взятое под наблюдение окно могли ни разу не опросить
        if !self.wm_states.lock().contains_key(&window) {
            self.refresh_wm_state(window);
        }
        let id = self.next_subscription_id();
        self.window_subs.insert(id, (window, signal));
        Ok(id)
    }

    fn disconnect(&mut self, _window: WindowId, id: SubscriptionId) {
        self.window_subs.remove(&id);
    }

    fn connect_global(&mut self, signal: GlobalSignal) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.global_subs.insert(id, signal);
        id
    }

    fn disconnect_global(&mut self, id: SubscriptionId) {
        self.global_subs.remove(&id);
    }
}

impl AppIdentity for X11Host {
    fn window_app_id(&self, window: WindowId) -> Option<String> {
        let class = &self.windows.get(&window)?.listed.wm_class;
        (!class.is_empty() && class != "N/A").then(|| class.to_lowercase())
    }

    fn window_title(&self, window: WindowId) -> Option<String> {
        let title = &self.windows.get(&window)?.listed.title;
        (!title.is_empty()).then(|| title.clone())
    }
}

#[async_trait::async_trait]
impl HostBackend for X11Host {
    async fn next_events(&mut self) -> Result<Vec<HostEvent>> {
        loop {
            self.interval.tick().await;
            let events = self.poll()?;
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    fn name(&self) -> &'static str {
        "x11"
    }
}

/// `0x03a00003  0 10   52   800  600  navigator.Firefox  host Заголовок окна`
pub fn parse_wmctrl_windows(output: &str) -> Vec<ListedWindow> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let id = u64::from_str_radix(id.trim_start_matches("0x"), 16).ok()?;
            let desktop = parts.next()?.parse().ok()?;
            let x = parts.next()?.parse().ok()?;
            let y = parts.next()?.parse().ok()?;
            let width = parts.next()?.parse().ok()?;
            let height = parts.next()?.parse().ok()?;
            let wm_class = parts.next()?.to_string();
            let _host = parts.next();
            let title = parts.collect::<Vec<_>>().join(" ");

            Some(ListedWindow {
                id: WindowId(id),
                desktop,
                rect: Rect::new(x, y, width, height),
                wm_class,
                title,
            })
        })
        .collect()
}

/// `1  * DG: 1920x1080  VP: 0,0  WA: 0,27 1920x1053  Рабочий стол 2`
pub fn parse_active_desktop(output: &str) -> Option<usize> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let index = parts.next()?.parse().ok()?;
        (parts.next()? == "*").then_some(index)
    })
}

/// ` 0: +*eDP-1 1920/344x1080/193+0+0  eDP-1`
pub fn parse_xrandr_monitors(output: &str) -> Vec<Monitor> {
    output
        .lines()
        .skip_while(|line| line.starts_with("Monitors:"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _index = parts.next()?;
            let name = parts.next()?;
            let geometry = parts.next()?;

            // 1920/344x1080/193+0+0
            let (size, offsets) = geometry.split_once('+')?;
            let (x, y) = offsets.split_once('+')?;
            let (width, height) = size.split_once('x')?;
            let width = width.split('/').next()?.parse().ok()?;
            let height = height.split('/').next()?.parse().ok()?;

            Some(Monitor {
                rect: Rect::new(x.parse().ok()?, y.parse().ok()?, width, height),
                primary: name.contains('*'),
            })
        })
        .collect()
}

/// `_NET_WORKAREA(CARDINAL) = 0, 27, 1920, 1053, 0, 27, 1920, 1053`
pub fn parse_workarea(output: &str) -> Vec<Rect> {
    let Some((_, values)) = output.split_once('=') else {
        return Vec::new();
    };
    let numbers: Vec<i32> = values
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect();

    numbers
        .chunks_exact(4)
        .map(|c| Rect::new(c[0], c[1], c[2], c[3]))
        .collect()
}

pub fn parse_window_type(output: &str) -> WindowType {
    // Свойство не задано: по EWMH это обычное окно
    if output.contains("not found") || output.contains("_NET_WM_WINDOW_TYPE_NORMAL") {
        WindowType::Normal
    } else if output.contains("_NET_WM_WINDOW_TYPE_DIALOG") {
        WindowType::Dialog
    } else if output.contains("_NET_WM_WINDOW_TYPE_UTILITY") {
        WindowType::Utility
    } else {
        WindowType::Other
    }
}

pub fn parse_wm_state(output: &str) -> MaximizeState {
    MaximizeState {
        horizontal: output.contains("_NET_WM_STATE_MAXIMIZED_HORZ"),
        vertical: output.contains("_NET_WM_STATE_MAXIMIZED_VERT"),
    }
}

use crate::config::{Config, SharedConfig};
use crate::debug_log;
use crate::error::{PositionerError, Result};
use crate::events::{HostEvent, Rect, WindowEvent, WindowEventType, WindowId, WindowType};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::geometry_store::GeometryStore;
use super::host::{GlobalSignal, HostBridge, SubscriptionId, WindowSignal};
use super::identity::IdentityResolver;
use super::restore_scheduler::{RestoreContext, RestoreDone, RestoreScheduler, RestoreStatus};
use super::save_debouncer::{save_window_geometry, SaveDebouncer, SaveOutcome};
use super::timers::{FiredTimer, TimerHost, TimerPurpose};

const WINDOW_SIGNALS: [WindowSignal; 3] = [
    WindowSignal::Unmanaging,
    WindowSignal::PositionChanged,
    WindowSignal::SizeChanged,
];

const GLOBAL_SIGNALS: [GlobalSignal; 3] = [
    GlobalSignal::WindowCreated,
    GlobalSignal::WindowMapped,
    GlobalSignal::ActiveWorkspaceChanged,
];

/// Подписки одного окна. Окно не удерживается: хост может освободить его
/// в любой момент, ручки лишь снимаются при уходе окна или остановке.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: SmallVec<[SubscriptionId; 4]>,
}

impl SubscriptionSet {
    pub fn push(&mut self, id: SubscriptionId) {
        self.handles.push(id);
    }

    fn disconnect_from<H: HostBridge + ?Sized>(self, host: &mut H, window: WindowId) {
        for id in self.handles {
            host.disconnect(window, id);
        }
    }
}

macro_rules! restore_ctx {
    ($self:ident, $config:expr) => {
        &mut RestoreContext {
            host: &mut *$self.host,
            timers: &mut $self.timers,
            store: &*$self.store,
            config: $config,
        }
    };
}

/// Связывает события оконного менеджера с восстановлением и сохранением
/// и владеет всеми подписками.
pub struct LifecycleTracker<H: HostBridge + ?Sized, T: TimerHost> {
    config: Arc<SharedConfig>,
    store: Arc<GeometryStore>,
    host: Box<H>,
    timers: T,
    restores: RestoreScheduler,
    saves: SaveDebouncer,
    tracked: HashMap<WindowId, SubscriptionSet>,
    /// Геометрия, выставленная восстановлением: эхо от оконного менеджера
    /// с этой рамкой не считается действием пользователя
    restored: HashMap<WindowId, Rect>,
    global: SmallVec<[SubscriptionId; 3]>,
}

impl<H: HostBridge + ?Sized, T: TimerHost> LifecycleTracker<H, T> {
    pub fn new(config: Arc<SharedConfig>, store: Arc<GeometryStore>, host: Box<H>, timers: T) -> Self {
        Self {
            config,
            store,
            host,
            timers,
            restores: RestoreScheduler::new(),
            saves: SaveDebouncer::new(),
            tracked: HashMap::new(),
            restored: HashMap::new(),
            global: SmallVec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn store(&self) -> &GeometryStore {
        &self.store
    }

    pub fn is_tracked(&self, window: WindowId) -> bool {
        self.tracked.contains_key(&window)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_restoring(&self, window: WindowId) -> bool {
        self.restores.is_pending(window)
    }

    /// Подключить глобальные сигналы, почистить старые записи и взять под
    /// наблюдение уже открытые окна (без восстановления).
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        let config = self.config.current();

        for signal in GLOBAL_SIGNALS {
            let id = self.host.connect_global(signal);
            self.global.push(id);
        }

        match self
            .store
            .cleanup_expired(config.storage.cleanup_after_days, now)
        {
            Ok(0) => {}
            Ok(removed) => info!(
                "Удалено {} записей старше {} дней",
                removed, config.storage.cleanup_after_days
            ),
            Err(e) => warn!("Не удалось очистить устаревшие записи: {}", e),
        }

        let mut adopted = 0;
        for window in self.host.managed_windows() {
            if self.is_trackable(window, &config) && self.track(window) {
                adopted += 1;
            }
        }

        info!(
            "Трекер запущен: {} окон уже открыто на рабочем столе {}, {} записей в хранилище",
            adopted,
            self.host.active_workspace(),
            self.store.len()
        );
        Ok(())
    }

    pub fn handle_event(&mut self, event: HostEvent, now: DateTime<Utc>) {
        match event {
            HostEvent::Window(event) => self.handle_window_event(event, now),
            HostEvent::ActiveWorkspaceChanged(workspace) => {
                let config = self.config.current();
                debug_log!(config, "Активный рабочий стол: {}", workspace);
                let saved = self.save_all_windows(now);
                debug!("Смена рабочего стола: сохранено окон {}", saved);
            }
        }
    }

    fn handle_window_event(&mut self, event: WindowEvent, now: DateTime<Utc>) {
        let window = event.window;
        match event.event_type {
            WindowEventType::Created => self.on_created(window),
            WindowEventType::Mapped => {
                let config = self.config.current();
                self.restores.on_mapped(restore_ctx!(self, &config), window);
            }
            WindowEventType::PositionChanged | WindowEventType::SizeChanged => {
                self.on_geometry_changed(window)
            }
            WindowEventType::Unmanaging => self.on_unmanaging(window, now),
        }
    }

    fn is_trackable(&self, window: WindowId, config: &Config) -> bool {
        match self.host.window_type(window) {
            Ok(WindowType::Normal) => {}
            Ok(other) => {
                debug_log!(config, "Окно {}: тип {:?}, не отслеживаем", window, other);
                return false;
            }
            Err(e) => {
                debug_log!(config, "Окно {}: {}", window, e);
                return false;
            }
        }

        if IdentityResolver::resolve(&*self.host, window, &config.identity).is_none() {
            debug_log!(config, "Окно {}: {}", window, PositionerError::InvalidIdentity(window));
            return false;
        }
        true
    }

    /// Подписаться на сигналы окна. `false`, если окно успело исчезнуть.
    fn track(&mut self, window: WindowId) -> bool {
        if self.tracked.contains_key(&window) {
            return true;
        }

        let mut set = SubscriptionSet::default();
        for signal in WINDOW_SIGNALS {
            match self.host.connect(window, signal) {
                Ok(id) => set.push(id),
                Err(e) => {
                    debug!("Окно {}: подписка не удалась: {}", window, e);
                    set.disconnect_from(&mut *self.host, window);
                    return false;
                }
            }
        }

        self.tracked.insert(window, set);
        true
    }

    fn untrack(&mut self, window: WindowId) {
        if let Some(set) = self.tracked.remove(&window) {
            set.disconnect_from(&mut *self.host, window);
        }
        self.restored.remove(&window);
    }

    fn on_created(&mut self, window: WindowId) {
        let config = self.config.current();
        if !self.is_trackable(window, &config) || !self.track(window) {
            return;
        }

        let status = self.restores.begin(restore_ctx!(self, &config), window);
        self.after_restore(window, status);
    }

    fn on_geometry_changed(&mut self, window: WindowId) {
        if !self.tracked.contains_key(&window) {
            return;
        }
        let config = self.config.current();

        let restore_pending = self.restores.is_pending(window)
            || self.is_restore_echo(window, config.restore.position_tolerance_px);
        self.saves
            .on_geometry_changed(&mut self.timers, window, restore_pending, &config);
    }

    /// Совпадает ли текущая рамка с выставленной восстановлением с точностью
    /// до допуска (рамка декораций сдвигает её на несколько пикселей).
    /// Первое несовпадение означает, что окно двигает пользователь.
    fn is_restore_echo(&mut self, window: WindowId, slack: i32) -> bool {
        let Some(applied) = self.restored.get(&window).copied() else {
            return false;
        };
        match self.host.frame_rect(window) {
            Ok(current) if current.is_close_to(&applied, slack) => true,
            _ => {
                self.restored.remove(&window);
                false
            }
        }
    }

    fn on_unmanaging(&mut self, window: WindowId, now: DateTime<Utc>) {
        let config = self.config.current();

        if self.restores.cancel(&mut self.timers, window) {
            debug_log!(config, "Окно {} закрыто до завершения восстановления", window);
        }
        if self.tracked.contains_key(&window) {
            let result = self.saves.flush(
                &*self.host,
                &mut self.timers,
                &self.store,
                window,
                &config,
                now,
            );
            log_save(&config, window, result);
        }

        self.untrack(window);
    }

    /// Обработать сработавший таймер
    pub fn on_timer(&mut self, fired: FiredTimer, now: DateTime<Utc>) {
        if !self.timers.consume(fired.handle) {
            // Таймер отменили, пока срабатывание шло по каналу
            return;
        }

        let config = self.config.current();
        match fired.purpose {
            TimerPurpose::Restore(window) => {
                let status = self
                    .restores
                    .on_timer(restore_ctx!(self, &config), window, fired.handle);
                self.after_restore(window, status);
            }
            TimerPurpose::Save(window) => {
                if self.saves.on_timer(window, fired.handle) {
                    let result = save_window_geometry(&*self.host, &self.store, window, &config, now);
                    log_save(&config, window, result);
                }
            }
        }
    }

    fn after_restore(&mut self, window: WindowId, status: RestoreStatus) {
        match status {
            RestoreStatus::Done(RestoreDone::Applied(rect)) => {
                self.restored.insert(window, rect);
            }
            RestoreStatus::Abandoned(reason) => {
                debug!("Окно {}: восстановление не выполнено ({})", window, reason);
            }
            _ => {}
        }
    }

    /// Сохранить все отслеживаемые окна
    pub fn save_all_windows(&mut self, now: DateTime<Utc>) -> usize {
        let config = self.config.current();
        let mut windows: Vec<WindowId> = self.tracked.keys().copied().collect();
        windows.sort();

        let mut saved = 0;
        for window in windows {
            let result = self.saves.flush(
                &*self.host,
                &mut self.timers,
                &self.store,
                window,
                &config,
                now,
            );
            if matches!(result, Ok(SaveOutcome::Saved { .. })) {
                saved += 1;
            }
            log_save(&config, window, result);
        }
        saved
    }

    /// Остановка: таймеры → подписки → сохранение оставшихся окон
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        let config = self.config.current();

        let mut windows: Vec<WindowId> = self.tracked.keys().copied().collect();
        windows.sort();

        let restores = self.restores.cancel_all(&mut self.timers);
        let saves = self.saves.cancel_all(&mut self.timers).len();
        debug!("Отменено восстановлений: {}, отложенных сохранений: {}", restores, saves);

        for window in &windows {
            if let Some(set) = self.tracked.remove(window) {
                set.disconnect_from(&mut *self.host, *window);
            }
        }
        for id in self.global.drain(..) {
            self.host.disconnect_global(id);
        }
        self.restored.clear();

        let mut saved = 0;
        for window in windows {
            let result = save_window_geometry(&*self.host, &self.store, window, &config, now);
            if matches!(result, Ok(SaveOutcome::Saved { .. })) {
                saved += 1;
            }
            log_save(&config, window, result);
        }

        info!("Трекер остановлен, сохранено окон: {}", saved);
    }
}

fn log_save(config: &Config, window: WindowId, result: Result<SaveOutcome>) {
    match result {
        Ok(SaveOutcome::Saved { key, record }) => {
            debug_log!(
                config,
                "Окно {} ({}): сохранено {} на мониторе {}",
                window,
                key,
                record.rect(),
                record.monitor
            );
        }
        Ok(SaveOutcome::Skipped(reason)) => {
            debug_log!(config, "Окно {}: сохранение пропущено: {}", window, reason);
        }
        Err(PositionerError::StaleReference(_)) => {
            debug_log!(config, "Окно {} исчезло до сохранения", window);
        }
        Err(e) => warn!("Не удалось сохранить окно {}: {}", window, e),
    }
}

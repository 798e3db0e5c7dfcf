use crate::config::Config;
use crate::debug_log;
use crate::error::{PositionerError, Result};
use crate::events::{Axis, WindowId, WindowType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

use super::geometry_store::{GeometryRecord, GeometryStore};
use super::host::HostBridge;
use super::identity::{IdentityResolver, WindowKey};
use super::timers::{TimerHandle, TimerHost, TimerPurpose};

/// Почему сохранение не состоялось
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotNormal(WindowType),
    Maximized,
    NoIdentity,
    TooSmall { width: i32, height: i32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotNormal(kind) => write!(f, "тип окна {:?}", kind),
            SkipReason::Maximized => f.write_str("окно развёрнуто"),
            SkipReason::NoIdentity => f.write_str("нет ключа"),
            SkipReason::TooSmall { width, height } => write!(f, "слишком мало: {}x{}", width, height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { key: WindowKey, record: GeometryRecord },
    Skipped(SkipReason),
}

/// Снять текущую геометрию окна и записать её в хранилище.
///
/// Окно уже уничтожено: `StaleReference`.
pub fn save_window_geometry<H: HostBridge + ?Sized>(
    host: &H,
    store: &GeometryStore,
    window: WindowId,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<SaveOutcome> {
    if !host.is_alive(window) {
        return Err(PositionerError::StaleReference(window));
    }

    let window_type = host.window_type(window)?;
    if window_type != WindowType::Normal {
        return Ok(SaveOutcome::Skipped(SkipReason::NotNormal(window_type)));
    }

    if host.is_maximized(window, Axis::Horizontal)? || host.is_maximized(window, Axis::Vertical)? {
        return Ok(SaveOutcome::Skipped(SkipReason::Maximized));
    }

    let Some(key) = IdentityResolver::resolve(host, window, &config.identity) else {
        return Ok(SaveOutcome::Skipped(SkipReason::NoIdentity));
    };

    let rect = host.frame_rect(window)?;
    if rect.width < config.save.min_size || rect.height < config.save.min_size {
        return Ok(SaveOutcome::Skipped(SkipReason::TooSmall {
            width: rect.width,
            height: rect.height,
        }));
    }

    let monitor = host.monitor_index(window)?;
    let record = GeometryRecord::new(rect, monitor, now);
    store.put(key.as_str(), record)?;

    Ok(SaveOutcome::Saved { key, record })
}

/// Откладывает сохранение до конца серии перемещений окна.
///
/// На окно взведено не больше одного таймера: новое событие отменяет
/// старый и взводит новый, сохраняет только самый последний.
#[derive(Debug, Default)]
pub struct SaveDebouncer {
    timers: HashMap<WindowId, TimerHandle>,
}

impl SaveDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Окно сдвинуто или изменило размер. `restore_pending`: у окна идёт
    /// восстановление, и событие вызвано им самим, а не пользователем.
    ///
    /// Возвращает `true`, если сохранение запланировано.
    pub fn on_geometry_changed<T: TimerHost + ?Sized>(
        &mut self,
        timers: &mut T,
        window: WindowId,
        restore_pending: bool,
        config: &Config,
    ) -> bool {
        if restore_pending {
            debug_log!(config, "Окно {}: изменение от восстановления, не сохраняем", window);
            return false;
        }

        if let Some(previous) = self.timers.remove(&window) {
            timers.cancel(previous);
        }
        let handle = timers.arm(config.save.debounce(), TimerPurpose::Save(window));
        self.timers.insert(window, handle);
        true
    }

    /// Сработал таймер сохранения. `true`: это текущий таймер окна и пора
    /// сохранять; устаревшая ручка игнорируется.
    pub fn on_timer(&mut self, window: WindowId, handle: TimerHandle) -> bool {
        match self.timers.get(&window) {
            Some(current) if *current == handle => {
                self.timers.remove(&window);
                true
            }
            _ => false,
        }
    }

    /// Сохранить немедленно, минуя задержку (окно снимается с управления)
    pub fn flush<H: HostBridge + ?Sized, T: TimerHost + ?Sized>(
        &mut self,
        host: &H,
        timers: &mut T,
        store: &GeometryStore,
        window: WindowId,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        self.cancel(timers, window);
        save_window_geometry(host, store, window, config, now)
    }

    pub fn cancel<T: TimerHost + ?Sized>(&mut self, timers: &mut T, window: WindowId) -> bool {
        match self.timers.remove(&window) {
            Some(handle) => timers.cancel(handle),
            None => false,
        }
    }

    /// Отменить все таймеры, вернуть окна, у которых сохранение было в очереди
    pub fn cancel_all<T: TimerHost + ?Sized>(&mut self, timers: &mut T) -> Vec<WindowId> {
        let mut windows = Vec::with_capacity(self.timers.len());
        for (window, handle) in self.timers.drain() {
            timers.cancel(handle);
            windows.push(window);
        }
        windows.sort();
        windows
    }

    pub fn has_pending(&self, window: WindowId) -> bool {
        self.timers.contains_key(&window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MaximizeState, Rect};
    use crate::services::host::{SimWindow, SimulatedHost};
    use crate::services::timers::ManualTimers;
    use chrono::TimeZone;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn setup(window: SimWindow) -> (SimulatedHost, WindowId, GeometryStore, Config) {
        let mut host = SimulatedHost::new(vec![
            Rect::new(0, 0, 1920, 1080),
            Rect::new(1920, 0, 2560, 1440),
        ]);
        let id = host.create_window(window);
        (host, id, GeometryStore::in_memory(), Config::default())
    }

    #[test]
    fn saves_normal_window_with_monitor_and_timestamp() {
        let (host, window, store, config) =
            setup(SimWindow::new("firefox", Rect::new(2000, 100, 1200, 800)));

        let outcome = save_window_geometry(&host, &store, window, &config, now()).unwrap();

        let expected = GeometryRecord {
            x: 2000,
            y: 100,
            width: 1200,
            height: 800,
            monitor: 1,
            saved_at: now().timestamp_micros(),
        };
        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                key: WindowKey::new("firefox"),
                record: expected
            }
        );
        assert_eq!(store.get("firefox"), Some(expected));
    }

    #[test]
    fn never_saves_maximized_on_either_axis() {
        let (mut host, window, store, config) =
            setup(SimWindow::new("firefox", Rect::new(0, 0, 1920, 1080)));

        for state in [
            MaximizeState {
                horizontal: true,
                vertical: false,
            },
            MaximizeState {
                horizontal: false,
                vertical: true,
            },
            MaximizeState::BOTH,
        ] {
            host.set_maximized(window, state);
            assert_eq!(
                save_window_geometry(&host, &store, window, &config, now()).unwrap(),
                SaveOutcome::Skipped(SkipReason::Maximized)
            );
        }
        assert!(store.is_empty());
    }

    #[test]
    fn never_saves_below_minimum_size() {
        let (mut host, window, store, config) =
            setup(SimWindow::new("firefox", Rect::new(0, 0, 49, 600)));

        assert_eq!(
            save_window_geometry(&host, &store, window, &config, now()).unwrap(),
            SaveOutcome::Skipped(SkipReason::TooSmall {
                width: 49,
                height: 600
            })
        );

        host.user_move(window, Rect::new(0, 0, 600, 49));
        assert!(matches!(
            save_window_geometry(&host, &store, window, &config, now()).unwrap(),
            SaveOutcome::Skipped(SkipReason::TooSmall { .. })
        ));

        host.user_move(window, Rect::new(0, 0, 50, 50));
        assert!(matches!(
            save_window_geometry(&host, &store, window, &config, now()).unwrap(),
            SaveOutcome::Saved { .. }
        ));
    }

    #[test]
    fn skips_dialogs_and_untrackable_windows() {
        let (mut host, dialog, store, config) = setup(
            SimWindow::new("firefox", Rect::new(0, 0, 400, 300)).with_type(WindowType::Dialog),
        );
        let anonymous =
            host.create_window(SimWindow::new("", Rect::new(0, 0, 400, 300)).without_identity());

        assert_eq!(
            save_window_geometry(&host, &store, dialog, &config, now()).unwrap(),
            SaveOutcome::Skipped(SkipReason::NotNormal(WindowType::Dialog))
        );
        assert_eq!(
            save_window_geometry(&host, &store, anonymous, &config, now()).unwrap(),
            SaveOutcome::Skipped(SkipReason::NoIdentity)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn dead_window_is_stale() {
        let (mut host, window, store, config) =
            setup(SimWindow::new("firefox", Rect::new(0, 0, 800, 600)));
        host.finalize_window(window);

        assert!(matches!(
            save_window_geometry(&host, &store, window, &config, now()),
            Err(PositionerError::StaleReference(w)) if w == window
        ));
    }

    #[test]
    fn burst_of_events_keeps_only_latest_timer() {
        let config = Config::default();
        let mut timers = ManualTimers::new();
        let mut debouncer = SaveDebouncer::new();
        let window = WindowId(1);

        assert!(debouncer.on_geometry_changed(&mut timers, window, false, &config));
        let (first, _) = timers.armed_for(TimerPurpose::Save(window)).unwrap();
        for _ in 0..4 {
            assert!(debouncer.on_geometry_changed(&mut timers, window, false, &config));
        }
        assert_eq!(timers.outstanding(), 1);

        let (latest, delay) = timers.armed_for(TimerPurpose::Save(window)).unwrap();
        assert_ne!(first, latest);
        assert_eq!(delay, Duration::from_millis(500));

        // Ручка из начала серии уже отменена и ничего не запускает
        assert!(!debouncer.on_timer(window, first));
        assert!(debouncer.has_pending(window));

        assert!(timers.consume(latest));
        assert!(debouncer.on_timer(window, latest));
        assert!(!debouncer.has_pending(window));
        assert!(!debouncer.on_timer(window, latest));
    }

    #[test]
    fn events_during_restore_are_ignored() {
        let config = Config::default();
        let mut timers = ManualTimers::new();
        let mut debouncer = SaveDebouncer::new();

        assert!(!debouncer.on_geometry_changed(&mut timers, WindowId(1), true, &config));
        assert_eq!(timers.outstanding(), 0);
        assert!(!debouncer.has_pending(WindowId(1)));
    }

    #[test]
    fn flush_cancels_timer_and_saves_now() {
        let (host, window, store, config) =
            setup(SimWindow::new("code", Rect::new(10, 20, 1000, 700)));
        let mut timers = ManualTimers::new();
        let mut debouncer = SaveDebouncer::new();

        debouncer.on_geometry_changed(&mut timers, window, false, &config);
        let outcome = debouncer
            .flush(&host, &mut timers, &store, window, &config, now())
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
        assert_eq!(timers.outstanding(), 0);
        assert_eq!(store.get("code").unwrap().rect(), Rect::new(10, 20, 1000, 700));
    }

    #[test]
    fn cancel_all_reports_pending_windows() {
        let config = Config::default();
        let mut timers = ManualTimers::new();
        let mut debouncer = SaveDebouncer::new();

        debouncer.on_geometry_changed(&mut timers, WindowId(2), false, &config);
        debouncer.on_geometry_changed(&mut timers, WindowId(1), false, &config);

        assert_eq!(debouncer.cancel_all(&mut timers), vec![WindowId(1), WindowId(2)]);
        assert_eq!(timers.outstanding(), 0);
        assert!(!debouncer.cancel(&mut timers, WindowId(1)));
    }
}

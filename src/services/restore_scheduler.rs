use crate::config::Config;
use crate::debug_log;
use crate::error::{PositionerError, Result};
use crate::events::{Rect, WindowId};
use std::collections::HashMap;
use std::fmt;

use super::geometry_store::GeometryStore;
use super::host::HostBridge;
use super::identity::IdentityResolver;
use super::reconciler::{reconcile, MonitorLayout, ReconcileAction};
use super::timers::{TimerHandle, TimerHost, TimerPurpose};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    /// Ждём сигнала об отображении окна
    AwaitingMap,
    /// Попытка запланирована или выполняется
    Scheduled,
}

/// Незавершённое восстановление одного окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRestore {
    /// Засчитанные попытки (только при наличии поверхности, если не настроено иное)
    pub attempts: u32,
    /// Все раунды планирования, для предохранителя
    pub rounds: u32,
    pub timer: Option<TimerHandle>,
    pub phase: RestorePhase,
}

impl PendingRestore {
    fn new() -> Self {
        Self {
            attempts: 0,
            rounds: 0,
            timer: None,
            phase: RestorePhase::AwaitingMap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreDone {
    AlreadyCorrect,
    /// Геометрия отправлена оконному менеджеру
    Applied(Rect),
    NoSavedGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    WindowGone,
    NoIdentity,
    InvalidGeometry,
    AttemptsExhausted,
    SafetyCeiling,
    HostFailure,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbandonReason::WindowGone => "окно исчезло",
            AbandonReason::NoIdentity => "нет ключа",
            AbandonReason::InvalidGeometry => "некорректная геометрия",
            AbandonReason::AttemptsExhausted => "попытки исчерпаны",
            AbandonReason::SafetyCeiling => "достигнут предел раундов",
            AbandonReason::HostFailure => "ошибка оконного менеджера",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// Ждём отображения окна
    Waiting,
    /// Следующая попытка запланирована
    Rescheduled,
    Done(RestoreDone),
    Abandoned(AbandonReason),
    /// Событие не относится к текущему восстановлению
    Ignored,
}

/// Всё, к чему планировщик обращается во время одного события
pub struct RestoreContext<'a, H: HostBridge + ?Sized, T: TimerHost + ?Sized> {
    pub host: &'a mut H,
    pub timers: &'a mut T,
    pub store: &'a GeometryStore,
    pub config: &'a Config,
}

/// Итог одной попытки с поверхностью
enum AttemptResult {
    Finished(RestoreDone),
    Retry,
}

/// Планировщик восстановления: конечный автомат на каждое окно.
///
/// Таймер окна хранится в его `PendingRestore`; перед взводом нового старый
/// отменяется, а сработавший таймер считается израсходованным. Устаревшее
/// срабатывание не совпадает с текущей ручкой и отбрасывается.
#[derive(Debug, Default)]
pub struct RestoreScheduler {
    pending: HashMap<WindowId, PendingRestore>,
}

impl RestoreScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Создано новое окно
    pub fn begin<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        if self.pending.contains_key(&window) {
            return RestoreStatus::Ignored;
        }

        if IdentityResolver::resolve(&*ctx.host, window, &ctx.config.identity).is_none() {
            debug_log!(ctx.config, "Окно {}: не удалось определить приложение, не восстанавливаем", window);
            return RestoreStatus::Abandoned(AbandonReason::NoIdentity);
        }

        self.pending.insert(window, PendingRestore::new());

        if ctx.config.restore.wait_for_map {
            debug_log!(ctx.config, "Окно {}: ждём отображения", window);
            RestoreStatus::Waiting
        } else {
            self.schedule(ctx, window)
        }
    }

    /// Окно отображено: запланировать первую попытку
    pub fn on_mapped<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        match self.pending.get(&window) {
            Some(pending) if pending.phase == RestorePhase::AwaitingMap => self.schedule(ctx, window),
            _ => RestoreStatus::Ignored,
        }
    }

    /// Сработал таймер. Ручка уже поглощена вызывающим и здесь не отменяется.
    pub fn on_timer<H, T>(
        &mut self,
        ctx: &mut RestoreContext<'_, H, T>,
        window: WindowId,
        handle: TimerHandle,
    ) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        match self.pending.get_mut(&window) {
            Some(pending) if pending.timer == Some(handle) => {
                pending.timer = None;
            }
            _ => return RestoreStatus::Ignored,
        }

        self.attempt(ctx, window)
    }

    /// Одна попытка восстановления
    pub fn attempt<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        let config = ctx.config;
        let Some(pending) = self.pending.get_mut(&window) else {
            return RestoreStatus::Ignored;
        };
        pending.rounds += 1;

        if !ctx.host.is_alive(window) {
            return self.abandon(ctx, window, AbandonReason::WindowGone);
        }

        let surface = match ctx.host.surface_exists(window) {
            Ok(surface) => surface,
            Err(e) => return self.handle_error(ctx, window, e),
        };

        if !surface {
            if config.restore.count_unready_attempts {
                pending.attempts += 1;
            }
            debug_log!(
                config,
                "Окно {}: раунд {}, попыток {}",
                window,
                pending.rounds,
                pending.attempts
            );
            return self.handle_error(ctx, window, PositionerError::TransientUnready(window));
        }

        pending.attempts += 1;
        let attempt = pending.attempts;

        match self.try_restore(ctx, window, attempt) {
            Ok(AttemptResult::Finished(done)) => self.finish(ctx, window, done),
            Ok(AttemptResult::Retry) => self.retry(ctx, window),
            Err(e) => self.handle_error(ctx, window, e),
        }
    }

    fn try_restore<H, T>(
        &self,
        ctx: &mut RestoreContext<'_, H, T>,
        window: WindowId,
        attempt: u32,
    ) -> Result<AttemptResult>
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        let config = ctx.config;
        let key = IdentityResolver::resolve(&*ctx.host, window, &config.identity)
            .ok_or(PositionerError::InvalidIdentity(window))?;

        let Some(saved) = ctx.store.get(key.as_str()) else {
            debug_log!(config, "Окно {} ({}): сохранённой геометрии нет", window, key);
            return Ok(AttemptResult::Finished(RestoreDone::NoSavedGeometry));
        };

        let layout = MonitorLayout::from_host(&*ctx.host)?;
        let maximized = ctx.host.maximized(window)?;
        let current = ctx.host.frame_rect(window)?;

        let reconciliation = reconcile(
            &saved,
            &layout,
            maximized,
            current,
            config.restore.position_tolerance_px,
            config.restore.min_window_size,
        )?;

        debug_log!(
            config,
            "Окно {} ({}), попытка {}: сохранено {}, сейчас {}, цель {} на мониторе {} -> {:?}",
            window,
            key,
            attempt,
            saved.rect(),
            current,
            reconciliation.target,
            reconciliation.monitor,
            reconciliation.action
        );

        match reconciliation.action {
            ReconcileAction::AlreadyCorrect => Ok(AttemptResult::Finished(RestoreDone::AlreadyCorrect)),
            ReconcileAction::Unmaximize => {
                ctx.host.unmaximize(window, maximized)?;
                Ok(AttemptResult::Retry)
            }
            ReconcileAction::Apply(rect) => {
                ctx.host.move_resize(window, rect)?;
                if config.restore.verify_after_apply {
                    Ok(AttemptResult::Retry)
                } else {
                    Ok(AttemptResult::Finished(RestoreDone::Applied(rect)))
                }
            }
        }
    }

    fn handle_error<H, T>(
        &mut self,
        ctx: &mut RestoreContext<'_, H, T>,
        window: WindowId,
        error: PositionerError,
    ) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        debug_log!(ctx.config, "Окно {}: {}", window, error);

        match error {
            PositionerError::StaleReference(_) => self.abandon(ctx, window, AbandonReason::WindowGone),
            PositionerError::InvalidIdentity(_) => self.abandon(ctx, window, AbandonReason::NoIdentity),
            PositionerError::InvalidGeometry(_) | PositionerError::PersistenceCorruption { .. } => {
                self.abandon(ctx, window, AbandonReason::InvalidGeometry)
            }
            error if error.is_retryable() => self.retry(ctx, window),
            _ => self.abandon(ctx, window, AbandonReason::HostFailure),
        }
    }

    /// Повторить, если бюджет попыток и раундов ещё не исчерпан
    fn retry<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        let config = ctx.config;
        let restore = &config.restore;
        let Some(pending) = self.pending.get(&window) else {
            return RestoreStatus::Ignored;
        };

        if pending.attempts >= restore.max_restore_attempts {
            self.abandon(ctx, window, AbandonReason::AttemptsExhausted)
        } else if pending.rounds >= restore.safety_ceiling_rounds {
            self.abandon(ctx, window, AbandonReason::SafetyCeiling)
        } else {
            self.schedule(ctx, window)
        }
    }

    fn schedule<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        let Some(pending) = self.pending.get_mut(&window) else {
            return RestoreStatus::Ignored;
        };

        if let Some(previous) = pending.timer.take() {
            ctx.timers.cancel(previous);
        }
        pending.timer = Some(
            ctx.timers
                .arm(ctx.config.restore.delay(), TimerPurpose::Restore(window)),
        );
        pending.phase = RestorePhase::Scheduled;
        RestoreStatus::Rescheduled
    }

    fn finish<H, T>(&mut self, ctx: &mut RestoreContext<'_, H, T>, window: WindowId, done: RestoreDone) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        self.cancel(&mut *ctx.timers, window);
        debug_log!(ctx.config, "Окно {}: восстановление завершено ({:?})", window, done);
        RestoreStatus::Done(done)
    }

    fn abandon<H, T>(
        &mut self,
        ctx: &mut RestoreContext<'_, H, T>,
        window: WindowId,
        reason: AbandonReason,
    ) -> RestoreStatus
    where
        H: HostBridge + ?Sized,
        T: TimerHost + ?Sized,
    {
        self.cancel(&mut *ctx.timers, window);
        debug_log!(ctx.config, "Окно {}: восстановление прекращено: {}", window, reason);
        RestoreStatus::Abandoned(reason)
    }

    /// Снять восстановление окна. Повторный вызов ничего не делает.
    pub fn cancel<T: TimerHost + ?Sized>(&mut self, timers: &mut T, window: WindowId) -> bool {
        match self.pending.remove(&window) {
            Some(pending) => {
                if let Some(handle) = pending.timer {
                    timers.cancel(handle);
                }
                true
            }
            None => false,
        }
    }

    pub fn cancel_all<T: TimerHost + ?Sized>(&mut self, timers: &mut T) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            if let Some(handle) = pending.timer {
                timers.cancel(handle);
            }
        }
        count
    }

    pub fn is_pending(&self, window: WindowId) -> bool {
        self.pending.contains_key(&window)
    }

    #[cfg(test)]
    pub fn state(&self, window: WindowId) -> Option<&PendingRestore> {
        self.pending.get(&window)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

use crate::config::SharedConfig;
use crate::error::{PositionerError, Result};
use crate::events::HostEvent;
use chrono::Utc;
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use super::host::HostBackend;
use super::lifecycle::LifecycleTracker;
use super::timers::{FiredTimer, TokioTimers};

/// Сколько ошибок опроса хоста подряд терпим до остановки
const MAX_CONSECUTIVE_HOST_ERRORS: u32 = 5;

pub type Tracker = LifecycleTracker<dyn HostBackend, TokioTimers>;

/// Что разбудило цикл событий
enum Tick {
    Host(Result<Vec<HostEvent>>),
    Timer(FiredTimer),
    Reload,
    Shutdown(&'static str),
}

/// Однопоточный цикл событий: события хоста, сработавшие таймеры, SIGHUP
/// (перечитать конфигурацию) и сигнал остановки. Всё обрабатывается по
/// одному событию за раз, ожидание есть только в `select!`.
pub async fn run_event_loop<F>(
    tracker: &mut Tracker,
    fired: &mut UnboundedReceiver<FiredTimer>,
    config: &SharedConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut hangup = signal(SignalKind::hangup()).map_err(|e| {
        PositionerError::ServiceUnavailable(format!("не удалось подписаться на SIGHUP: {}", e))
    })?;
    tokio::pin!(shutdown);

    tracker.start(Utc::now())?;
    info!("Цикл событий запущен (бэкенд: {})", tracker.host().name());

    let mut host_errors = 0u32;
    let result = loop {
        let tick = tokio::select! {
            events = tracker.host_mut().next_events() => Tick::Host(events),
            timer = fired.recv() => match timer {
                Some(timer) => Tick::Timer(timer),
                None => Tick::Shutdown("канал таймеров закрыт"),
            },
            _ = hangup.recv() => Tick::Reload,
            _ = &mut shutdown => Tick::Shutdown("получен сигнал завершения"),
        };

        match tick {
            Tick::Host(Ok(events)) => {
                host_errors = 0;
                for event in events {
                    tracker.handle_event(event, Utc::now());
                }
            }
            Tick::Host(Err(e)) => {
                host_errors += 1;
                warn!(
                    "Ошибка оконного менеджера ({}/{}): {}",
                    host_errors, MAX_CONSECUTIVE_HOST_ERRORS, e
                );
                if host_errors >= MAX_CONSECUTIVE_HOST_ERRORS {
                    error!("Оконный менеджер недоступен, останавливаемся");
                    break Err(e);
                }
            }
            Tick::Timer(timer) => tracker.on_timer(timer, Utc::now()),
            Tick::Reload => match config.reload() {
                Ok(()) => info!("Конфигурация перечитана (SIGHUP)"),
                Err(e) => warn!("Конфигурация не перечитана, действует прежняя: {:#}", e),
            },
            Tick::Shutdown(reason) => {
                info!("Завершение работы: {}", reason);
                break Ok(());
            }
        }
    };

    tracker.shutdown(Utc::now());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::geometry_store::GeometryStore;
    use crate::services::host::create_host_backend;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn dry_run_session_saves_demo_windows() {
        let shared = Arc::new(SharedConfig::new(Config::default(), None));
        let store = Arc::new(GeometryStore::in_memory());
        let host = create_host_backend(&shared.current(), true).unwrap();
        let (timers, mut fired) = TokioTimers::new();
        let mut tracker = LifecycleTracker::new(shared.clone(), store.clone(), host, timers);

        run_event_loop(
            &mut tracker,
            &mut fired,
            &shared,
            tokio::time::sleep(Duration::from_secs(30)),
        )
        .await
        .unwrap();

        let saved = store.get("org.gnome.Terminal.desktop").unwrap();
        assert_eq!((saved.width, saved.height), (900, 650));
        assert!(store.get("firefox.desktop").is_some());
        assert_eq!(tracker.tracked_count(), 0);
    }
}

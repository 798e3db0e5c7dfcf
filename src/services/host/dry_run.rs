use crate::config::Config;
use crate::events::{Rect, WindowId};
use tokio::time::{interval, Duration, Interval};
use tracing::info;

use super::simulated::{SimWindow, SimulatedHost};

const FAKE_APPS: &[(&str, &str)] = &[
    ("org.gnome.Terminal.desktop", "Terminal - dry_run"),
    ("firefox.desktop", "Browser - dry_run"),
    ("code.desktop", "Editor - dry_run"),
];

/// Сценарий сухого запуска: окна открываются, отображаются, двигаются
/// пользователем и закрываются, затем цикл повторяется, и сохранённая
/// геометрия восстанавливается.
pub struct DemoScript {
    interval: Interval,
    step: usize,
    current: Option<WindowId>,
    closing: Option<WindowId>,
}

impl DemoScript {
    pub fn new(period: Duration) -> Self {
        Self {
            interval: interval(period),
            step: 0,
            current: None,
            closing: None,
        }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Один шаг сценария: 4 шага на окно
    pub fn step(&mut self, host: &mut SimulatedHost) {
        // Закрытое на прошлом шаге окно освобождается только теперь,
        // чтобы трекер успел сохранить его геометрию
        if let Some(window) = self.closing.take() {
            host.finalize_window(window);
        }

        let app_index = (self.step / 4) % FAKE_APPS.len();
        let (app_id, title) = FAKE_APPS[app_index];
        // Смещение меняется по кругу, чтобы было что сохранять
        let shift = ((self.step / 4 / FAKE_APPS.len()) % 5) as i32 * 40;

        match self.step % 4 {
            0 => {
                let rect = Rect::new(0, 0, 640, 480);
                let window = host.create_window(SimWindow::new(app_id, rect).with_title(title));
                info!("Dry-run: эмулируем создание окна {} ({})", window, title);
                self.current = Some(window);
            }
            1 => {
                if let Some(window) = self.current {
                    info!("Dry-run: окно {} отображено", window);
                    host.map_window(window);
                }
            }
            2 => {
                if let Some(window) = self.current {
                    let rect = Rect::new(100 + shift, 80 + shift, 900, 650);
                    info!("Dry-run: пользователь перемещает окно {} в {}", window, rect);
                    host.user_move(window, rect);
                }
            }
            _ => {
                if let Some(window) = self.current.take() {
                    info!("Dry-run: окно {} закрыто", window);
                    host.destroy_window(window);
                    self.closing = Some(window);
                }
            }
        }

        self.step += 1;
    }
}

/// Хост сухого запуска: два монитора, панель сверху на основном
pub fn dry_run_host(config: &Config) -> SimulatedHost {
    info!("Dry-run режим - оконный менеджер работает в режиме эмуляции");

    let mut host = SimulatedHost::new(vec![
        Rect::new(0, 32, 1920, 1048),
        Rect::new(1920, 0, 2560, 1440),
    ]);
    host.demo = Some(DemoScript::new(Duration::from_millis(
        config.backend.polling_interval_ms.max(1000),
    )));
    host
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{HostEvent, WindowEventType};
    use crate::services::host::{GlobalSignal, WindowManager, WindowSignal};

    #[tokio::test]
    async fn demo_cycle_creates_maps_moves_and_closes() {
        let mut host = SimulatedHost::new(vec![Rect::new(0, 0, 1920, 1080)]);
        host.connect_global(GlobalSignal::WindowCreated);
        host.connect_global(GlobalSignal::WindowMapped);
        let mut demo = DemoScript::new(Duration::from_millis(10));

        demo.step(&mut host);
        let window = match host.drain_events().as_slice() {
            [HostEvent::Window(event)] => {
                assert_eq!(event.event_type, WindowEventType::Created);
                event.window
            }
            other => panic!("неожиданные события: {:?}", other),
        };
        host.connect(window, WindowSignal::Unmanaging).unwrap();

        demo.step(&mut host);
        assert!(host.surface_exists(window).unwrap());

        demo.step(&mut host);
        assert_eq!(host.frame_rect(window).unwrap(), Rect::new(100, 80, 900, 650));

        demo.step(&mut host);
        // Окно ещё читается, пока не начался следующий шаг
        assert!(host.is_alive(window));
        host.drain_events();

        demo.step(&mut host);
        assert!(!host.is_alive(window));
    }
}

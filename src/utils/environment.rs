use crate::config::Config;
use crate::error::{PositionerError, Result};
use tracing::{info, warn};

/// Утилиты, без которых X11-бэкенд не работает
pub const REQUIRED_X11_TOOLS: &[&str] = &["wmctrl", "xprop", "xrandr"];

/// Проверить окружение перед запуском выбранного бэкенда
pub fn check_environment(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run || config.backend.mode == "dry_run" {
        info!("Сухой запуск: проверка окружения пропущена");
        return Ok(());
    }

    info!("Проверка окружения...");

    check_display()?;
    check_tools(REQUIRED_X11_TOOLS)?;
    check_not_root();

    info!("Проверка окружения завершена успешно");
    Ok(())
}

fn check_display() -> Result<()> {
    match std::env::var("DISPLAY") {
        Ok(display_name) if !display_name.is_empty() => {
            info!("Используется дисплей {}", display_name);
            Ok(())
        }
        _ => Err(PositionerError::ServiceUnavailable(
            "Переменная DISPLAY не задана: нет доступа к X-серверу".to_string(),
        )),
    }
}

/// Вернуть список утилит, которые не найдены в PATH
pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .map(|tool| tool.to_string())
        .collect()
}

fn check_tools(tools: &[&str]) -> Result<()> {
    let missing = missing_tools(tools);
    if missing.is_empty() {
        return Ok(());
    }

    Err(PositionerError::ServiceUnavailable(format!(
        "Не найдены утилиты: {}. Установите пакеты wmctrl, x11-utils и x11-xserver-utils",
        missing.join(", ")
    )))
}

fn check_not_root() {
    match std::env::var("USER") {
        Ok(user) if user == "root" => {
            warn!("⚠️  Приложение запущено от имени root!");
            warn!("   Команды X11 будут выполняться через sudo от имени SUDO_USER");
            warn!("   Рекомендуется запускать приложение от имени обычного пользователя");
        }
        Ok(user) => {
            info!("Приложение запущено от имени пользователя: {}", user);
        }
        Err(_) => {
            warn!("Не удалось определить пользователя");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tools_reports_unknown_binaries() {
        let missing = missing_tools(&["definitely-not-a-real-tool-4711"]);
        assert_eq!(missing, vec!["definitely-not-a-real-tool-4711".to_string()]);
    }

    #[test]
    fn test_dry_run_skips_checks() {
        let config = Config::default();
        assert!(check_environment(&config, true).is_ok());
    }
}

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub restore: RestoreConfig,
    pub save: SaveConfig,
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Подробный журнал решений save/restore (без смены уровня фильтра)
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestoreConfig {
    pub restore_delay_ms: u64,
    pub max_restore_attempts: u32,
    pub position_tolerance_px: i32,
    pub min_window_size: i32,
    /// Предел раундов планирования, в том числе пока у окна нет поверхности
    pub safety_ceiling_rounds: u32,
    pub wait_for_map: bool,
    pub count_unready_attempts: bool,
    pub verify_after_apply: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaveConfig {
    pub debounce_ms: u64,
    pub min_size: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub cleanup_after_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    pub include_title: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub mode: String,
    pub polling_interval_ms: u64,
}

impl RestoreConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms.max(1))
    }
}

impl SaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("winpos")
        .join("positions.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                debug_logging: false,
            },
            restore: RestoreConfig {
                restore_delay_ms: 250,
                max_restore_attempts: 5,
                position_tolerance_px: 5,
                min_window_size: 100,
                safety_ceiling_rounds: 50,
                wait_for_map: true,
                count_unready_attempts: false,
                verify_after_apply: false,
            },
            save: SaveConfig {
                debounce_ms: 500,
                min_size: 50,
            },
            storage: StorageConfig {
                path: default_storage_path(),
                cleanup_after_days: 30,
            },
            identity: IdentityConfig {
                include_title: false,
            },
            backend: BackendConfig {
                mode: "x11".to_string(),
                polling_interval_ms: 500,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("WINPOS_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация восстановления (диапазоны как в окне настроек)
        if !(1..=2000).contains(&self.restore.restore_delay_ms) {
            anyhow::bail!("restore_delay_ms должно быть в диапазоне 1..=2000");
        }
        if !(1..=15).contains(&self.restore.max_restore_attempts) {
            anyhow::bail!("max_restore_attempts должно быть в диапазоне 1..=15");
        }
        if !(0..=50).contains(&self.restore.position_tolerance_px) {
            anyhow::bail!("position_tolerance_px должно быть в диапазоне 0..=50");
        }
        if self.restore.min_window_size < 1 {
            anyhow::bail!("min_window_size должно быть больше 0");
        }
        if self.restore.safety_ceiling_rounds == 0 {
            anyhow::bail!("safety_ceiling_rounds должно быть больше 0");
        }

        // Валидация сохранения
        if self.save.debounce_ms == 0 {
            anyhow::bail!("debounce_ms должно быть больше 0");
        }
        if self.save.min_size < 1 {
            anyhow::bail!("min_size должно быть больше 0");
        }

        if !(1..=365).contains(&self.storage.cleanup_after_days) {
            anyhow::bail!("cleanup_after_days должно быть в диапазоне 1..=365");
        }

        // Валидация бэкенда
        match self.backend.mode.as_str() {
            "x11" | "dry_run" => {}
            _ => anyhow::bail!("Неверный режим бэкенда: {}", self.backend.mode),
        }

        if self.backend.polling_interval_ms < 100 {
            anyhow::bail!("polling_interval_ms должно быть минимум 100");
        }

        Ok(())
    }
}

/// Конфигурация, которую можно перечитать на лету (SIGHUP).
///
/// Потребители берут `current()` в каждой точке решения и не держат снимок
/// дольше одного раунда планирования.
pub struct SharedConfig {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(Config::load(path)?, Some(path.to_path_buf())))
    }

    pub fn current(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    pub fn replace(&self, config: Config) {
        *self.current.write() = Arc::new(config);
    }

    /// Перечитать файл. При ошибке старая конфигурация остаётся в силе.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let config = Config::load(path)?;
        self.replace(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.restore.max_restore_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.restore.position_tolerance_px = 51;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.mode = "wayland".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[restore]\nmax_restore_attempts = 3\n\n[identity]\ninclude_title = true"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.restore.max_restore_attempts, 3);
        assert!(config.identity.include_title);
        // Остальное берётся из значений по умолчанию
        assert_eq!(config.save.debounce_ms, 500);
        assert_eq!(config.restore.restore_delay_ms, 250);
    }

    #[test]
    fn test_reload_keeps_old_config_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[save]\ndebounce_ms = 300").unwrap();

        let shared = SharedConfig::load(file.path()).unwrap();
        assert_eq!(shared.current().save.debounce_ms, 300);

        std::fs::write(file.path(), "[save]\ndebounce_ms = 0\n").unwrap();
        assert!(shared.reload().is_err());
        assert_eq!(shared.current().save.debounce_ms, 300);

        std::fs::write(file.path(), "[save]\ndebounce_ms = 750\n").unwrap();
        shared.reload().unwrap();
        assert_eq!(shared.current().save.debounce_ms, 750);
    }
}

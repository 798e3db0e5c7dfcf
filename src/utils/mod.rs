pub mod environment;

// ✅ Макросы условного логирования для оптимизации производительности
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}

/// Журнал решений save/restore: `info!` при включённом `debug_logging`,
/// иначе обычный `debug!` (если уровень фильтра позволяет).
#[macro_export]
macro_rules! debug_log {
    ($config:expr, $($arg:tt)*) => {
        if $config.logging.debug_logging {
            tracing::info!($($arg)*);
        } else {
            $crate::debug_if_enabled!($($arg)*);
        }
    };
}

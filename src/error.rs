use crate::events::WindowId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PositionerError {
    /// Окно существует, но ещё не отрисовано: повторить позже
    #[error("Окно {0} ещё не отрисовано")]
    TransientUnready(WindowId),

    /// Нельзя определить приложение: окно не отслеживается
    #[error("Не удалось определить приложение окна {0}")]
    InvalidIdentity(WindowId),

    /// Окно уничтожено во время операции
    #[error("Окно {0} больше не существует")]
    StaleReference(WindowId),

    /// Одна сохранённая запись повреждена: удаляется только она
    #[error("Повреждённая запись '{key}': {reason}")]
    PersistenceCorruption { key: String, reason: String },

    /// Оконный менеджер отказался перемещать окно
    #[error("Оконный менеджер отклонил изменение геометрии окна {window}: {reason}")]
    ReconciliationRejected { window: WindowId, reason: String },

    #[error("Некорректная геометрия: {0}")]
    InvalidGeometry(String),

    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка сериализации: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl PositionerError {
    /// Имеет ли смысл повторять операцию для этого окна
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PositionerError::TransientUnready(_) | PositionerError::ReconciliationRejected { .. }
        )
    }

    pub fn rejected(window: WindowId, reason: impl Into<String>) -> Self {
        PositionerError::ReconciliationRejected {
            window,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PositionerError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! positioner_error {
    (geometry, $($arg:tt)*) => {
        $crate::error::PositionerError::InvalidGeometry(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::PositionerError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::PositionerError::Internal(format!($($arg)*))
    };
}

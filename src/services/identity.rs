use crate::config::IdentityConfig;
use crate::events::WindowId;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::host::AppIdentity;

/// Ключ, под которым хранится геометрия окна
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey(String);

impl WindowKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Определяет ключ окна по приложению-владельцу.
///
/// Ключ не кэшируется: заголовок может смениться после создания окна,
/// поэтому он вычисляется заново при каждом обращении.
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn resolve<H: AppIdentity + ?Sized>(
        host: &H,
        window: WindowId,
        config: &IdentityConfig,
    ) -> Option<WindowKey> {
        let app_id = host.window_app_id(window)?;
        let app_id = app_id.trim();
        if app_id.is_empty() {
            return None;
        }

        if config.include_title {
            if let Some(title) = host.window_title(window) {
                let title = title.trim();
                if !title.is_empty() {
                    return Some(WindowKey::new(format!("{}::{}", app_id, title)));
                }
            }
        }

        Some(WindowKey::new(app_id))
    }
}

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use super::geometry_store::{retention_cutoff, GeometryStore};

/// Административные операции над хранилищем (подкоманды CLI)
pub struct StoreAdmin {
    store: Arc<GeometryStore>,
}

impl StoreAdmin {
    pub fn new(store: Arc<GeometryStore>) -> Self {
        Self { store }
    }

    pub fn clear_all(&self) -> Result<usize> {
        let count = self.store.len();
        self.store.clear()?;
        info!("Хранилище очищено, удалено записей: {}", count);
        Ok(count)
    }

    /// Удалить записи, сохранённые раньше `cutoff`
    pub fn cleanup_now(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.store.delete_older_than(cutoff.timestamp_micros())?;
        info!("Удалено записей старше {}: {}", cutoff.format("%Y-%m-%d %H:%M"), removed);
        Ok(removed)
    }

    pub fn cleanup_older_than_days(&self, days: u32, now: DateTime<Utc>) -> Result<usize> {
        self.cleanup_now(retention_cutoff(days, now)?)
    }

    pub fn count_entries(&self) -> usize {
        self.store.len()
    }

    /// Краткий отчёт для вывода в терминал
    pub fn stats(&self) -> String {
        let location = self
            .store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "в памяти".to_string());
        format!("Записей: {} ({})", self.count_entries(), location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Rect;
    use crate::services::geometry_store::GeometryRecord;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn admin_with(ages_in_days: &[(&str, i64)]) -> StoreAdmin {
        let store = Arc::new(GeometryStore::in_memory());
        for (key, age) in ages_in_days {
            store
                .put(
                    key,
                    GeometryRecord::new(
                        Rect::new(0, 0, 800, 600),
                        0,
                        now() - ChronoDuration::days(*age),
                    ),
                )
                .unwrap();
        }
        StoreAdmin::new(store)
    }

    #[test]
    fn cleanup_by_days_keeps_recent() {
        let admin = admin_with(&[("old", 40), ("recent", 2), ("today", 0)]);

        assert_eq!(admin.cleanup_older_than_days(30, now()).unwrap(), 1);
        assert_eq!(admin.count_entries(), 2);
        assert_eq!(admin.cleanup_now(now() - ChronoDuration::hours(1)).unwrap(), 1);
        assert_eq!(admin.count_entries(), 1);
    }

    #[test]
    fn cleanup_with_huge_day_count_is_an_error() {
        let admin = admin_with(&[("old", 40)]);

        assert!(admin.cleanup_older_than_days(u32::MAX, now()).is_err());
        assert_eq!(admin.count_entries(), 1);
    }

    #[test]
    fn clear_all_reports_removed() {
        let admin = admin_with(&[("a", 1), ("b", 2)]);

        assert_eq!(admin.clear_all().unwrap(), 2);
        assert_eq!(admin.count_entries(), 0);
        assert_eq!(admin.stats(), "Записей: 0 (в памяти)");
    }
}

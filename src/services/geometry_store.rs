use crate::error::{PositionerError, Result};
use crate::events::Rect;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CURRENT_LAYOUT_VERSION: u32 = 1;

/// Сохранённая геометрия окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub monitor: usize,
    /// Время сохранения, микросекунды с эпохи Unix
    pub saved_at: i64,
}

impl GeometryRecord {
    pub fn new(rect: Rect, monitor: usize, saved_at: DateTime<Utc>) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            monitor,
            saved_at: saved_at.timestamp_micros(),
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width < 1 || self.height < 1 {
            return Err(crate::positioner_error!(
                geometry,
                "размер {}x{} недопустим",
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

/// Позиция и размер на диске
#[derive(Debug, Serialize, Deserialize)]
struct StoredGeometry {
    position: [i32; 2],
    size: [i32; 2],
}

/// Формат файла: три параллельные коллекции, связанные ключом окна
#[derive(Debug, Default, Deserialize)]
struct RawLayout {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    positions: BTreeMap<String, Value>,
    #[serde(default)]
    monitors: BTreeMap<String, Value>,
    #[serde(default)]
    timestamps: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct LayoutOut<'a> {
    version: u32,
    positions: BTreeMap<&'a str, StoredGeometry>,
    monitors: BTreeMap<&'a str, usize>,
    timestamps: BTreeMap<&'a str, i64>,
}

/// Момент `now - days`. Слишком большой срок выходит за диапазон дат chrono.
pub fn retention_cutoff(days: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    ChronoDuration::try_days(i64::from(days))
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            PositionerError::Config(anyhow::anyhow!(
                "срок хранения {} дней выходит за допустимый диапазон дат",
                days
            ))
        })
}

fn corruption(key: &str, reason: impl Into<String>) -> PositionerError {
    PositionerError::PersistenceCorruption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn decode_entry(key: &str, raw: &RawLayout) -> Result<GeometryRecord> {
    let position = raw
        .positions
        .get(key)
        .ok_or_else(|| corruption(key, "нет позиции"))?;
    let monitor = raw
        .monitors
        .get(key)
        .ok_or_else(|| corruption(key, "нет монитора"))?;
    let timestamp = raw
        .timestamps
        .get(key)
        .ok_or_else(|| corruption(key, "нет времени сохранения"))?;

    let stored: StoredGeometry = serde_json::from_value(position.clone())
        .map_err(|e| corruption(key, format!("позиция: {}", e)))?;
    let monitor = monitor
        .as_u64()
        .ok_or_else(|| corruption(key, format!("монитор: {}", monitor)))?;
    let saved_at = timestamp
        .as_i64()
        .ok_or_else(|| corruption(key, format!("время: {}", timestamp)))?;

    let record = GeometryRecord {
        x: stored.position[0],
        y: stored.position[1],
        width: stored.size[0],
        height: stored.size[1],
        monitor: monitor as usize,
        saved_at,
    };
    record
        .validate()
        .map_err(|e| corruption(key, e.to_string()))?;
    Ok(record)
}

/// Разобрать файл: повреждённые записи отбрасываются по одной, остальные загружаются
fn decode_layout(raw: &RawLayout) -> (BTreeMap<String, GeometryRecord>, Vec<PositionerError>) {
    let mut keys: Vec<&String> = raw
        .positions
        .keys()
        .chain(raw.monitors.keys())
        .chain(raw.timestamps.keys())
        .collect();
    keys.sort();
    keys.dedup();

    let mut entries = BTreeMap::new();
    let mut problems = Vec::new();
    for key in keys {
        match decode_entry(key, raw) {
            Ok(record) => {
                entries.insert(key.clone(), record);
            }
            Err(e) => problems.push(e),
        }
    }
    (entries, problems)
}

fn write_layout_atomically(path: &Path, entries: &BTreeMap<String, GeometryRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let layout = LayoutOut {
        version: CURRENT_LAYOUT_VERSION,
        positions: entries
            .iter()
            .map(|(k, r)| {
                (
                    k.as_str(),
                    StoredGeometry {
                        position: [r.x, r.y],
                        size: [r.width, r.height],
                    },
                )
            })
            .collect(),
        monitors: entries.iter().map(|(k, r)| (k.as_str(), r.monitor)).collect(),
        timestamps: entries.iter().map(|(k, r)| (k.as_str(), r.saved_at)).collect(),
    };

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    serde_json::to_writer_pretty(&mut file, &layout)?;
    file.write_all(b"\n")?;
    file.sync_all()?;

    fs::rename(tmp, path)?;
    Ok(())
}

/// Хранилище геометрии окон.
///
/// Позиция+размер, монитор и время сохранения одного ключа всегда меняются
/// и удаляются вместе: в памяти это одна запись, а на диск каждый раз
/// атомарно пишется весь снимок. Если запись на диск не удалась, снимок в
/// памяти остаётся прежним.
pub struct GeometryStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, GeometryRecord>>,
}

impl GeometryStore {
    /// Открыть хранилище в файле. Отсутствующий файл: пустое хранилище.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            let raw: RawLayout = serde_json::from_slice(&bytes)?;
            if raw.version > CURRENT_LAYOUT_VERSION {
                warn!("Файл {:?} записан более новой версией ({})", path, raw.version);
            }

            let (entries, problems) = decode_layout(&raw);
            for problem in &problems {
                warn!("Запись пропущена: {}", problem);
            }
            entries
        } else {
            BTreeMap::new()
        };

        info!("Хранилище геометрии {:?}: {} записей", path, entries.len());

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Хранилище без файла (сухой запуск, тесты)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<GeometryRecord> {
        self.entries.read().get(key).copied()
    }

    pub fn put(&self, key: &str, record: GeometryRecord) -> Result<()> {
        record.validate()?;

        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(key.to_string(), record);
        self.commit(&mut entries, next)
    }

    /// Удалить все записи с `saved_at < cutoff` (микросекунды)
    pub fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.retain(|_, record| record.saved_at >= cutoff);

        let removed = entries.len() - next.len();
        if removed > 0 {
            self.commit(&mut entries, next)?;
        }
        Ok(removed)
    }

    /// Очистка по возрасту относительно `now`
    pub fn cleanup_expired(&self, days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = retention_cutoff(days, now)?;
        self.delete_older_than(cutoff.timestamp_micros())
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        self.commit(&mut entries, BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn commit(
        &self,
        current: &mut BTreeMap<String, GeometryRecord>,
        next: BTreeMap<String, GeometryRecord>,
    ) -> Result<()> {
        if let Some(path) = self.path.as_ref() {
            write_layout_atomically(path, &next)?;
        }
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(x: i32, saved_at: i64) -> GeometryRecord {
        GeometryRecord {
            x,
            y: 40,
            width: 800,
            height: 600,
            monitor: 0,
            saved_at,
        }
    }

    #[test]
    fn put_get_and_overwrite() {
        let store = GeometryStore::in_memory();
        assert_eq!(store.get("firefox"), None);

        store.put("firefox", record(10, 1)).unwrap();
        store.put("firefox", record(20, 2)).unwrap();

        assert_eq!(store.get("firefox"), Some(record(20, 2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_rejects_degenerate_size() {
        let store = GeometryStore::in_memory();
        let mut bad = record(0, 1);
        bad.width = 0;

        assert!(matches!(
            store.put("firefox", bad),
            Err(PositionerError::InvalidGeometry(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn retention_cutoff_rejects_out_of_range_days() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        assert_eq!(
            retention_cutoff(30, now).unwrap(),
            Utc.with_ymd_and_hms(2026, 9, 19, 12, 0, 0).unwrap()
        );
        assert!(matches!(
            retention_cutoff(u32::MAX, now),
            Err(PositionerError::Config(_))
        ));

        let store = GeometryStore::in_memory();
        assert!(store.cleanup_expired(u32::MAX, now).is_err());
    }

    #[test]
    fn delete_older_than_removes_exactly_expired() {
        let store = GeometryStore::in_memory();
        store.put("old", record(1, 100)).unwrap();
        store.put("edge", record(2, 200)).unwrap();
        store.put("new", record(3, 300)).unwrap();

        assert_eq!(store.delete_older_than(200).unwrap(), 1);

        assert_eq!(store.get("old"), None);
        assert_eq!(store.get("edge"), Some(record(2, 200)));
        assert_eq!(store.get("new"), Some(record(3, 300)));
        assert_eq!(store.delete_older_than(200).unwrap(), 0);
    }

    #[test]
    fn cleanup_expired_uses_days() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let store = GeometryStore::in_memory();
        store
            .put("stale", GeometryRecord::new(Rect::new(0, 0, 800, 600), 0, now - ChronoDuration::days(31)))
            .unwrap();
        store
            .put("fresh", GeometryRecord::new(Rect::new(0, 0, 800, 600), 0, now - ChronoDuration::days(29)))
            .unwrap();

        assert_eq!(store.cleanup_expired(30, now).unwrap(), 1);
        assert_eq!(store.keys(), vec!["fresh".to_string()]);
    }

    #[test]
    fn persisted_layout_keeps_three_coupled_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let store = GeometryStore::open(&path).unwrap();
        store.put("firefox", record(10, 100)).unwrap();
        store.put("code", record(20, 300)).unwrap();
        store.delete_older_than(200).unwrap();

        let json: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["positions"]["code"]["position"], serde_json::json!([20, 40]));
        assert_eq!(json["positions"]["code"]["size"], serde_json::json!([800, 600]));
        assert_eq!(json["monitors"]["code"], 0);
        assert_eq!(json["timestamps"]["code"], 300);
        for field in ["positions", "monitors", "timestamps"] {
            assert!(json[field].get("firefox").is_none(), "{} не очищено", field);
        }

        let reopened = GeometryStore::open(&path).unwrap();
        assert_eq!(reopened.get("code"), Some(record(20, 300)));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn corrupted_entry_is_dropped_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "positions": {
                    "good": {"position": [1, 2], "size": [800, 600]},
                    "bad-size": {"position": [1, 2], "size": "wide"},
                    "orphan": {"position": [1, 2], "size": [800, 600]}
                },
                "monitors": {"good": 1, "bad-size": 0},
                "timestamps": {"good": 42, "bad-size": 42, "orphan": 42}
            }"#,
        )
        .unwrap();

        let store = GeometryStore::open(&path).unwrap();

        assert_eq!(store.keys(), vec!["good".to_string()]);
        assert_eq!(
            store.get("good"),
            Some(GeometryRecord {
                x: 1,
                y: 2,
                width: 800,
                height: 600,
                monitor: 1,
                saved_at: 42
            })
        );
    }

    #[test]
    fn clear_empties_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("positions.json");

        let store = GeometryStore::open(&path).unwrap();
        store.put("firefox", record(10, 100)).unwrap();
        store.clear().unwrap();

        assert!(store.is_empty());
        assert!(GeometryStore::open(&path).unwrap().is_empty());
    }
}

use super::stats::aggregate;
use super::{EventStore, StatsRange, UsageEvent, UsageStats};
use crate::detection::BoundingBox;
use crate::error::StorageError;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_uuid TEXT NOT NULL UNIQUE,
    confirmed_at TEXT NOT NULL,
    confirmed_at_ms INTEGER NOT NULL,
    screenshot_path TEXT NOT NULL,
    person_bbox TEXT NOT NULL,
    phone_bbox TEXT NOT NULL,
    overlap_ratio REAL NOT NULL,
    frame_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_confirmed_at ON events(confirmed_at_ms);
";

const SELECT_EVENT: &str = "SELECT event_uuid, confirmed_at_ms, screenshot_path, person_bbox, \
     phone_bbox, overlap_ratio, frame_count FROM events";

/// SQLite-backed event log
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

/// Raw column values; decoded outside the rusqlite row callback
struct EventRow {
    uuid: String,
    confirmed_at_ms: i64,
    screenshot: String,
    person: String,
    phone: String,
    overlap_ratio: f64,
    frame_count: i64,
}

impl EventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            confirmed_at_ms: row.get(1)?,
            screenshot: row.get(2)?,
            person: row.get(3)?,
            phone: row.get(4)?,
            overlap_ratio: row.get(5)?,
            frame_count: row.get(6)?,
        })
    }

    fn into_event(self) -> Result<UsageEvent, StorageError> {
        let corrupt = |details: String| StorageError::CorruptRecord {
            id: self.uuid.clone(),
            details,
        };

        let id = Uuid::parse_str(&self.uuid).map_err(|e| corrupt(e.to_string()))?;
        let confirmed_at = Utc
            .timestamp_millis_opt(self.confirmed_at_ms)
            .single()
            .ok_or_else(|| corrupt(format!("bad timestamp {}", self.confirmed_at_ms)))?;
        let person: BoundingBox =
            serde_json::from_str(&self.person).map_err(|e| corrupt(e.to_string()))?;
        let phone: BoundingBox =
            serde_json::from_str(&self.phone).map_err(|e| corrupt(e.to_string()))?;
        let frame_count =
            u32::try_from(self.frame_count).map_err(|e| corrupt(e.to_string()))?;

        Ok(UsageEvent {
            id,
            confirmed_at,
            person,
            phone,
            overlap_ratio: self.overlap_ratio as f32,
            frame_count,
            screenshot: self.screenshot,
        })
    }
}

impl SqliteEventStore {
    /// Open (or create) the database file, creating parent directories as needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        info!("Event database initialized at: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_events(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<UsageEvent>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn ms_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &UsageEvent) -> Result<(), StorageError> {
        let person = serde_json::to_string(&event.person).map_err(|e| {
            StorageError::CorruptRecord {
                id: event.id.to_string(),
                details: e.to_string(),
            }
        })?;
        let phone = serde_json::to_string(&event.phone).map_err(|e| {
            StorageError::CorruptRecord {
                id: event.id.to_string(),
                details: e.to_string(),
            }
        })?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (event_uuid, confirmed_at, confirmed_at_ms, screenshot_path,
                                 person_bbox, phone_bbox, overlap_ratio, frame_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.to_string(),
                event.confirmed_at.to_rfc3339(),
                event.confirmed_at.timestamp_millis(),
                event.screenshot,
                person,
                phone,
                event.overlap_ratio as f64,
                event.frame_count as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        debug!("Appended event {} ({})", event.id, event.screenshot);
        Ok(())
    }

    fn query_aggregates(&self, range: &StatsRange) -> Result<UsageStats, StorageError> {
        let conn = self.conn.lock();

        let (total, first_ms, last_ms): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(confirmed_at_ms), MAX(confirmed_at_ms) FROM events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT confirmed_at_ms FROM events
             WHERE confirmed_at_ms >= ?1 AND confirmed_at_ms < ?2",
        )?;
        let window = stmt
            .query_map(
                params![
                    range.window_start_utc().timestamp_millis(),
                    range.window_end_utc().timestamp_millis()
                ],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(ms_to_utc)
            .collect::<Vec<_>>();

        Ok(aggregate(
            range,
            &window,
            total.max(0) as u64,
            first_ms.and_then(ms_to_utc),
            last_ms.and_then(ms_to_utc),
        ))
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<UsageEvent>, StorageError> {
        let conn = self.conn.lock();
        Self::query_events(
            &conn,
            &format!("{} ORDER BY confirmed_at_ms DESC, id DESC LIMIT ?1", SELECT_EVENT),
            params![limit as i64],
        )
    }

    fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StorageError> {
        let conn = self.conn.lock();
        Self::query_events(
            &conn,
            &format!(
                "{} WHERE confirmed_at_ms >= ?1 AND confirmed_at_ms < ?2 ORDER BY confirmed_at_ms ASC",
                SELECT_EVENT
            ),
            params![start.timestamp_millis(), end.timestamp_millis()],
        )
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<UsageEvent>, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let pruned = Self::query_events(
            &tx,
            &format!("{} WHERE confirmed_at_ms < ?1", SELECT_EVENT),
            params![cutoff.timestamp_millis()],
        )?;
        let deleted = tx.execute(
            "DELETE FROM events WHERE confirmed_at_ms < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        tx.commit()?;

        if deleted > 0 {
            info!("Pruned {} events older than {}", deleted, cutoff.to_rfc3339());
        }
        Ok(pruned)
    }
}

impl SqliteEventStore {
    /// Look up one event by id
    pub fn get(&self, id: &Uuid) -> Result<Option<UsageEvent>, StorageError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE event_uuid = ?1", SELECT_EVENT),
                params![id.to_string()],
                EventRow::from_row,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use chrono_tz::Tz;

    fn event_at(at: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            confirmed_at: at,
            person: BoundingBox::new(100.0, 50.0, 200.0, 400.0),
            phone: BoundingBox::new(180.0, 200.0, 20.0, 40.0),
            overlap_ratio: 1.0,
            frame_count: 5,
            screenshot: format!("{}/shot.jpg", at.format("%Y-%m-%d")),
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let event = event_at(utc(2024, 6, 1, 12));
        store.append(&event).unwrap();

        assert_eq!(store.get(&event.id).unwrap(), Some(event.clone()));
        assert_eq!(store.recent_events(10).unwrap(), vec![event]);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_uuid_is_rejected() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let event = event_at(utc(2024, 6, 1, 12));
        store.append(&event).unwrap();
        assert!(matches!(
            store.append(&event),
            Err(StorageError::Database(_))
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_recent_and_range_ordering() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for h in [9, 11, 10] {
            store.append(&event_at(utc(2024, 6, 1, h))).unwrap();
        }

        let recent = store.recent_events(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].confirmed_at, utc(2024, 6, 1, 11));
        assert_eq!(recent[1].confirmed_at, utc(2024, 6, 1, 10));

        let range = store
            .events_in_range(utc(2024, 6, 1, 10), utc(2024, 6, 1, 12))
            .unwrap();
        assert_eq!(
            range.iter().map(|e| e.confirmed_at).collect::<Vec<_>>(),
            vec![utc(2024, 6, 1, 10), utc(2024, 6, 1, 11)]
        );
    }

    #[test]
    fn test_query_aggregates() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let end = utc(2024, 6, 10, 15);
        for offset_days in [0, 0, 1, 3, 20] {
            store
                .append(&event_at(end - Duration::days(offset_days)))
                .unwrap();
        }

        let range = StatsRange::new(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(), 7, Tz::UTC);
        let stats = store.query_aggregates(&range).unwrap();

        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.today_events, 2);
        assert_eq!(stats.yesterday_events, 1);
        assert_eq!(stats.week_events, 4);
        assert_eq!(stats.daily["2024-06-07"], 1);
        assert_eq!(stats.hourly["15"], 2);
        assert_eq!(stats.first_event, Some(end - Duration::days(20)));
        assert_eq!(stats.last_event, Some(end));
        assert_eq!(stats.tracking_days, 21);
    }

    #[test]
    fn test_prune_before_returns_removed_events() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let old = event_at(utc(2024, 1, 1, 8));
        let fresh = event_at(utc(2024, 3, 1, 8));
        store.append(&old).unwrap();
        store.append(&fresh).unwrap();

        let pruned = store.prune_before(utc(2024, 2, 1, 0)).unwrap();
        assert_eq!(pruned, vec![old]);
        assert_eq!(store.recent_events(10).unwrap(), vec![fresh]);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let store = SqliteEventStore::open(&path).unwrap();
        store.append(&event_at(utc(2024, 6, 1, 12))).unwrap();
        drop(store);

        let reopened = SqliteEventStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}

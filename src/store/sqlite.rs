//! SQLite event store
//!
//! One connection behind a mutex. Batches are appended inside a single
//! transaction, so readers never observe half a batch.

use crate::domain::error::StoreError;
use crate::domain::types::{Gateway, Geolocation, HistoryQuery, SightingEvent, TagMac};
use crate::store::{EventStore, GatewayStore};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
BEGIN;
CREATE TABLE IF NOT EXISTS gateways (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mac TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    latitude REAL,
    longitude REAL
);
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mac TEXT NOT NULL,
    rssi INTEGER NOT NULL,
    battery_level INTEGER,
    gateway_mac TEXT,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_mac_timestamp ON events (mac, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
PRAGMA user_version = 1;
COMMIT;";

const EVENT_COLUMNS: &str = "mac, rssi, battery_level, gateway_mac, timestamp";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %journal_mode, "sqlite_journal_mode");
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        info!(path = %path.display(), "sqlite_store_opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self.conn.lock().query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::Unavailable(format!(
                "unsupported schema version {current}, max supported {SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            self.conn.lock().execute_batch(SCHEMA_V1)?;
            debug!(version = 1, "sqlite_schema_migrated");
        }
        Ok(())
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<SightingEvent> {
    let mac: String = row.get(0)?;
    let mac = TagMac::parse(&mac).ok_or(rusqlite::Error::InvalidColumnType(
        0,
        "mac".to_string(),
        rusqlite::types::Type::Text,
    ))?;
    Ok(SightingEvent {
        mac,
        rssi: row.get(1)?,
        battery_level: row.get(2)?,
        gateway_id: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

fn gateway_from_row(row: &Row<'_>) -> rusqlite::Result<Gateway> {
    let latitude: Option<f64> = row.get(2)?;
    let longitude: Option<f64> = row.get(3)?;
    Ok(Gateway {
        mac: row.get(0)?,
        name: row.get(1)?,
        geolocation: match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Geolocation { latitude, longitude }),
            _ => None,
        },
    })
}

/// Map unique-constraint violations to `StoreError::Conflict`
fn map_write_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, ref message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(message.clone().unwrap_or_else(|| failure.to_string()))
        }
        other => StoreError::Sqlite(other),
    }
}

impl EventStore for SqliteStore {
    fn append_batch(&self, events: &[SightingEvent]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events (mac, rssi, battery_level, gateway_mac, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.mac.as_str(),
                    event.rssi,
                    event.battery_level,
                    event.gateway_id,
                    event.timestamp
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn latest_per_tag(&self) -> Result<Vec<SightingEvent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM (
                 SELECT *, ROW_NUMBER() OVER (
                     PARTITION BY mac ORDER BY timestamp DESC, id DESC
                 ) AS rn
                 FROM events
             )
             WHERE rn = 1
             ORDER BY mac"
        ))?;
        let rows = stmt.query_map([], event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn latest_for_tag(&self, mac: &TagMac) -> Result<Option<SightingEvent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE mac = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT 1"
        ))?;
        Ok(stmt.query_row(params![mac.as_str()], event_from_row).optional()?)
    }

    fn has_events(&self, mac: &TagMac) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM events WHERE mac = ?1 LIMIT 1", params![mac.as_str()], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn history(&self, query: &HistoryQuery) -> Result<Vec<SightingEvent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE mac = ?1
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?4"
        ))?;
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(
            params![query.mac.as_str(), query.start_time, query.end_time, limit],
            event_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl GatewayStore for SqliteStore {
    fn find_gateway(&self, mac: &str) -> Result<Option<Gateway>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT mac, name, latitude, longitude FROM gateways WHERE mac = ?1",
        )?;
        Ok(stmt.query_row(params![mac], gateway_from_row).optional()?)
    }

    fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT mac, name, latitude, longitude FROM gateways ORDER BY mac")?;
        let rows = stmt.query_map([], gateway_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_gateway(&self, gateway: &Gateway) -> Result<(), StoreError> {
        let (latitude, longitude) = split_geolocation(gateway.geolocation);
        self.conn
            .lock()
            .execute(
                "INSERT INTO gateways (mac, name, latitude, longitude) VALUES (?1, ?2, ?3, ?4)",
                params![gateway.mac, gateway.name, latitude, longitude],
            )
            .map_err(map_write_error)?;
        Ok(())
    }

    fn update_gateway(&self, gateway: &Gateway) -> Result<bool, StoreError> {
        let (latitude, longitude) = split_geolocation(gateway.geolocation);
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE gateways SET name = ?2, latitude = ?3, longitude = ?4 WHERE mac = ?1",
                params![gateway.mac, gateway.name, latitude, longitude],
            )
            .map_err(map_write_error)?;
        Ok(changed > 0)
    }
}

fn split_geolocation(geolocation: Option<Geolocation>) -> (Option<f64>, Option<f64>) {
    match geolocation {
        Some(geo) => (Some(geo.latitude), Some(geo.longitude)),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(mac: &str, rssi: i64, timestamp: i64) -> SightingEvent {
        SightingEvent {
            mac: TagMac::parse(mac).unwrap(),
            rssi,
            battery_level: None,
            gateway_id: Some("gw1".to_string()),
            timestamp,
        }
    }

    fn query(mac: &str, start: Option<i64>, end: Option<i64>, limit: usize) -> HistoryQuery {
        HistoryQuery { mac: TagMac::parse(mac).unwrap(), start_time: start, end_time: end, limit }
    }

    #[test]
    fn test_migrate_sets_schema_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        // Re-running the migration is a no-op
        store.migrate().unwrap();
    }

    #[test]
    fn test_latest_per_tag_picks_max_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_batch(&[event("bb", -50, 200), event("aa", -70, 100), event("aa", -40, 300)])
            .unwrap();
        store.append_batch(&[event("aa", -90, 250)]).unwrap();

        let latest = store.latest_per_tag().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].mac.as_str(), "aa");
        assert_eq!(latest[0].rssi, -40);
        assert_eq!(latest[1].mac.as_str(), "bb");
    }

    #[test]
    fn test_latest_tie_goes_to_last_insert() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append_batch(&[event("aa", -70, 100), event("aa", -30, 100)]).unwrap();

        assert_eq!(store.latest_per_tag().unwrap()[0].rssi, -30);
        assert_eq!(store.latest_for_tag(&TagMac::parse("aa").unwrap()).unwrap().unwrap().rssi, -30);
    }

    #[test]
    fn test_history_filters_and_orders() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events: Vec<_> = (0..10).map(|i| event("aa", -i, 1000 + i)).collect();
        store.append_batch(&events).unwrap();
        store.append_batch(&[event("bb", -1, 1005)]).unwrap();

        let page = store.history(&query("aa", Some(1002), Some(1006), 100)).unwrap();
        let stamps: Vec<i64> = page.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![1006, 1005, 1004, 1003, 1002]);

        let page = store.history(&query("aa", None, None, 3)).unwrap();
        let stamps: Vec<i64> = page.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![1009, 1008, 1007]);
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON events
                 WHEN NEW.mac = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.append_batch(&[event("ok", -40, 100), event("boom", -41, 101)]);
        assert!(result.is_err());
        assert!(!store.has_events(&TagMac::parse("ok").unwrap()).unwrap());
        assert!(store.latest_per_tag().unwrap().is_empty());

        // The connection stays usable after the rollback
        assert_eq!(store.append_batch(&[event("ok", -40, 100)]).unwrap(), 1);
        assert!(store.has_events(&TagMac::parse("ok").unwrap()).unwrap());
    }

    #[test]
    fn test_has_events() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mac = TagMac::parse("aa").unwrap();
        assert!(!store.has_events(&mac).unwrap());
        store.append_batch(&[event("aa", -1, 1)]).unwrap();
        assert!(store.has_events(&mac).unwrap());
    }

    #[test]
    fn test_gateway_unique_constraints() {
        let store = SqliteStore::open_in_memory().unwrap();
        let gw = Gateway {
            mac: "aabbcc".into(),
            name: "dock".into(),
            geolocation: Some(Geolocation { latitude: 1.0, longitude: 2.0 }),
        };
        store.insert_gateway(&gw).unwrap();

        let same_mac = Gateway { name: "other".into(), ..gw.clone() };
        assert!(matches!(store.insert_gateway(&same_mac), Err(StoreError::Conflict(_))));

        let same_name = Gateway { mac: "ddeeff".into(), ..gw.clone() };
        assert!(matches!(store.insert_gateway(&same_name), Err(StoreError::Conflict(_))));

        assert_eq!(store.find_gateway("aabbcc").unwrap(), Some(gw));
        assert_eq!(store.find_gateway("missing").unwrap(), None);
    }

    #[test]
    fn test_update_gateway() {
        let store = SqliteStore::open_in_memory().unwrap();
        let gw = Gateway { mac: "aa".into(), name: "one".into(), geolocation: None };
        store.insert_gateway(&gw).unwrap();
        store.insert_gateway(&Gateway { mac: "bb".into(), name: "two".into(), geolocation: None }).unwrap();

        let renamed = Gateway { name: "uno".into(), ..gw.clone() };
        assert!(store.update_gateway(&renamed).unwrap());
        assert_eq!(store.find_gateway("aa").unwrap().unwrap().name, "uno");

        let clash = Gateway { name: "two".into(), ..gw };
        assert!(matches!(store.update_gateway(&clash), Err(StoreError::Conflict(_))));

        let missing = Gateway { mac: "zz".into(), name: "zz".into(), geolocation: None };
        assert!(!store.update_gateway(&missing).unwrap());

        let names: Vec<String> = store.list_gateways().unwrap().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["uno", "two"]);
    }
}

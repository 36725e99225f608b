use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use miqat_core::types::{ClockOffset, DispatchRecord, Location, ReminderConfig, Schedule, StateKey};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
};

/// Durable key-value state shared by the foreground and background contexts.
pub trait Store: Send + Sync {
    fn get(&self, key: StateKey) -> Result<Option<String>>;

    fn put(&self, key: StateKey, value: &str) -> Result<()>;

    fn remove(&self, key: StateKey) -> Result<()>;

    /// Write `new` only if the stored value still equals `expected`
    /// (`None` meaning "absent"). Returns whether the write happened.
    fn compare_and_swap(&self, key: StateKey, expected: Option<&str>, new: &str) -> Result<bool>;
}

/// SQLite-backed [`Store`]. Each context owns its own connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=2000;")?;
        Self::new(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::InvalidState("store connection lock poisoned".to_string()))
    }
}

fn read(conn: &Connection, key: StateKey) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM kv_state WHERE key = ?1",
            [key.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

fn write(conn: &Connection, key: StateKey, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key.as_str(), value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn get(&self, key: StateKey) -> Result<Option<String>> {
        let conn = self.conn()?;
        read(&conn, key)
    }

    fn put(&self, key: StateKey, value: &str) -> Result<()> {
        let conn = self.conn()?;
        write(&conn, key, value)
    }

    fn remove(&self, key: StateKey) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM kv_state WHERE key = ?1", [key.as_str()])?;
        Ok(())
    }

    fn compare_and_swap(&self, key: StateKey, expected: Option<&str>, new: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so a second connection
        // cannot interleave between our read and write.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = read(&tx, key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        write(&tx, key, new)?;
        tx.commit()?;
        Ok(true)
    }
}

/// Everything one scheduler cycle needs, read in one pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub schedule: Option<Schedule>,
    pub reminder: Option<ReminderConfig>,
    pub offset: Option<ClockOffset>,
    pub dispatch: DispatchRecord,
    /// Raw stored form of `dispatch`, used as the compare-and-swap witness.
    pub dispatch_raw: Option<String>,
    pub audio_enabled: Option<bool>,
}

/// Typed view over a [`Store`].
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<dyn Store>,
}

impl StateStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &dyn Store {
        self.inner.as_ref()
    }

    fn load<T: DeserializeOwned>(&self, key: StateKey) -> Result<Option<T>> {
        let Some(raw) = self.inner.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                // A corrupt value behaves like a missing one; it is overwritten on next save.
                warn!(%key, "ignoring malformed stored value: {e}");
                Ok(None)
            }
        }
    }

    fn save<T: serde::Serialize>(&self, key: StateKey, value: &T) -> Result<()> {
        self.inner.put(key, &serde_json::to_string(value)?)
    }

    pub fn schedule(&self) -> Result<Option<Schedule>> {
        self.load(StateKey::Schedule)
    }

    /// Replace the schedule wholesale and stamp `lastUpdated` and `location`.
    pub fn save_schedule(&self, schedule: &Schedule, location: &Location, at: DateTime<Utc>) -> Result<()> {
        self.save(StateKey::Schedule, schedule)?;
        self.save(StateKey::Location, location)?;
        self.save(StateKey::LastUpdated, &at)?;
        debug!(%location, entries = schedule.len(), "schedule stored");
        Ok(())
    }

    pub fn reminder(&self) -> Result<Option<ReminderConfig>> {
        Ok(self
            .load::<ReminderConfig>(StateKey::ReminderSettings)?
            .map(ReminderConfig::clamped))
    }

    pub fn save_reminder(&self, config: &ReminderConfig) -> Result<()> {
        self.save(StateKey::ReminderSettings, &config.clamped())
    }

    pub fn clock_offset(&self) -> Result<Option<ClockOffset>> {
        self.load(StateKey::TimeDiff)
    }

    pub fn save_clock_offset(&self, offset: &ClockOffset) -> Result<()> {
        self.save(StateKey::TimeDiff, offset)
    }

    pub fn clear_clock_offset(&self) -> Result<()> {
        self.inner.remove(StateKey::TimeDiff)
    }

    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        self.load(StateKey::LastUpdated)
    }

    pub fn location(&self) -> Result<Option<Location>> {
        self.load(StateKey::Location)
    }

    pub fn save_location(&self, location: &Location) -> Result<()> {
        self.save(StateKey::Location, location)
    }

    /// Select a new location. Dropping `lastUpdated` makes the current
    /// schedule stale, so the next refresh check refetches it.
    pub fn change_location(&self, location: &Location) -> Result<()> {
        self.save_location(location)?;
        self.inner.remove(StateKey::LastUpdated)
    }

    pub fn audio_enabled(&self) -> Result<Option<bool>> {
        self.load(StateKey::AudioEnabled)
    }

    pub fn save_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.save(StateKey::AudioEnabled, &enabled)
    }

    pub fn dispatch(&self) -> Result<DispatchRecord> {
        Ok(self.load(StateKey::DispatchState)?.unwrap_or_default())
    }

    /// Persist `record` only if `dispatchState` still holds `expected`.
    pub fn swap_dispatch(&self, expected: Option<&str>, record: &DispatchRecord) -> Result<bool> {
        let new = serde_json::to_string(record)?;
        self.inner
            .compare_and_swap(StateKey::DispatchState, expected, &new)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let dispatch_raw = self.inner.get(StateKey::DispatchState)?;
        let dispatch = dispatch_raw
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Ok(Snapshot {
            schedule: self.schedule()?,
            reminder: self.reminder()?,
            offset: self.clock_offset()?,
            dispatch,
            dispatch_raw,
            audio_enabled: self.audio_enabled()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miqat_core::types::{PrayerName, TimeOfDay};

    fn store() -> StateStore {
        StateStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn put_get_remove() {
        let s = SqliteStore::in_memory().unwrap();
        assert_eq!(s.get(StateKey::TimeDiff).unwrap(), None);
        s.put(StateKey::TimeDiff, "1").unwrap();
        s.put(StateKey::TimeDiff, "2").unwrap();
        assert_eq!(s.get(StateKey::TimeDiff).unwrap().as_deref(), Some("2"));
        s.remove(StateKey::TimeDiff).unwrap();
        assert_eq!(s.get(StateKey::TimeDiff).unwrap(), None);
    }

    #[test]
    fn compare_and_swap_rejects_stale_witness() {
        let s = SqliteStore::in_memory().unwrap();
        assert!(s.compare_and_swap(StateKey::DispatchState, None, "a").unwrap());
        // Second writer still believes the key is absent.
        assert!(!s.compare_and_swap(StateKey::DispatchState, None, "b").unwrap());
        assert!(s.compare_and_swap(StateKey::DispatchState, Some("a"), "c").unwrap());
        assert_eq!(s.get(StateKey::DispatchState).unwrap().as_deref(), Some("c"));
    }

    #[test]
    fn schedule_save_stamps_location_and_time() {
        let s = store();
        let schedule = Schedule::new().with(PrayerName::Dhuhr, TimeOfDay::new(12, 10).unwrap());
        let at = Utc::now();
        s.save_schedule(&schedule, &Location::new("XK", "Peja"), at).unwrap();

        assert_eq!(s.schedule().unwrap(), Some(schedule));
        assert_eq!(s.location().unwrap().unwrap().city, "Peja");
        assert_eq!(s.last_updated().unwrap(), Some(at));
    }

    #[test]
    fn change_location_unstamps_schedule() {
        let s = store();
        let schedule = Schedule::new().with(PrayerName::Asr, TimeOfDay::new(15, 40).unwrap());
        s.save_schedule(&schedule, &Location::new("XK", "Prizren"), Utc::now())
            .unwrap();

        s.change_location(&Location::new("MK", "Skopje")).unwrap();
        assert_eq!(s.location().unwrap(), Some(Location::new("MK", "Skopje")));
        assert_eq!(s.last_updated().unwrap(), None);
        // The old schedule stays usable until the refetch lands.
        assert_eq!(s.schedule().unwrap(), Some(schedule));
    }

    #[test]
    fn malformed_values_read_as_missing() {
        let s = store();
        s.raw().put(StateKey::Schedule, "{not json").unwrap();
        assert_eq!(s.schedule().unwrap(), None);

        s.raw().put(StateKey::DispatchState, "garbage").unwrap();
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.dispatch, DispatchRecord::default());
        assert_eq!(snap.dispatch_raw.as_deref(), Some("garbage"));
    }

    #[test]
    fn reminder_is_clamped_on_load() {
        let s = store();
        s.raw()
            .put(StateKey::ReminderSettings, r#"{"enabled":true,"minutesBefore":45}"#)
            .unwrap();
        assert_eq!(s.reminder().unwrap(), Some(ReminderConfig::new(true, 30)));
    }
}

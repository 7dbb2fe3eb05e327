//! presence-store — Durable identity roster and append-only attendance log.
//!
//! A SQLite store with two tables: `identities` (enrolled people with
//! their averaged embeddings) and `events` (append-only attendance
//! log). Cooldown is enforced at write time: the check and the insert
//! run inside one transaction on the mutex-guarded connection, so two
//! overlapping `mark_attendance` calls for the same identity cannot
//! both commit within the cooldown window.
//!
//! All SQLite failures are converted to typed outcomes here; nothing
//! below the orchestrator propagates a raw storage fault into the
//! frame loop.

use chrono::{DateTime, SecondsFormat, Utc};
use presence_core::{Embedding, Identity};
use rusqlite::{params, Connection, OptionalExtension};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity already exists: {0}")]
    Duplicate(String),
    #[error("corrupt embedding blob for identity {0}")]
    CorruptEmbedding(String),
    #[error("corrupt timestamp in event log: {0}")]
    CorruptTimestamp(String),
    #[error("store mutex poisoned")]
    Poisoned,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Time source for cooldown checks. Injected so tests can run the
/// cooldown scenarios against a simulated clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One row of the attendance log join, newest first.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed attendance store.
///
/// The connection lives behind a mutex: concurrent callers are safe,
/// writes are serialized. Safe to share via `Arc`.
pub struct AttendanceStore {
    conn: Mutex<Connection>,
    cooldown: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl AttendanceStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path, cooldown_seconds: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, cooldown_seconds, Arc::new(SystemClock))
    }

    /// In-memory store, used by tests and diagnostics.
    pub fn open_in_memory(cooldown_seconds: u64, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, cooldown_seconds, clock)
    }

    fn with_connection(
        conn: Connection,
        cooldown_seconds: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            cooldown: chrono::Duration::seconds(cooldown_seconds as i64),
            clock,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.guard()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS identities (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              embedding BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              identity_id TEXT NOT NULL REFERENCES identities(id),
              timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_identity_time
              ON events(identity_id, timestamp);
            "#,
        )?;
        Ok(())
    }

    fn guard(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Enroll a new identity. Fails with [`StoreError::Duplicate`] if
    /// the id already exists; never overwrites.
    pub fn add_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let blob = encode_embedding(&identity.embedding);
        let result = self.guard()?.execute(
            "INSERT INTO identities (id, name, embedding) VALUES (?1, ?2, ?3)",
            params![identity.id, identity.name, blob],
        );
        match result {
            Ok(_) => {
                tracing::info!(id = %identity.id, name = %identity.name, "identity enrolled");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(identity.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of all enrolled identities, in enrollment order.
    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let guard = self.guard()?;
        let mut stmt =
            guard.prepare("SELECT id, name, embedding FROM identities ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let embedding =
                decode_embedding(&blob).ok_or_else(|| StoreError::CorruptEmbedding(id.clone()))?;
            identities.push(Identity {
                id,
                name,
                embedding,
            });
        }
        Ok(identities)
    }

    /// Remove an identity and all of its attendance events.
    ///
    /// Returns false (never an error) when the id does not exist or
    /// the delete fails, so the caller can retry or inform the
    /// operator.
    pub fn delete_identity(&self, id: &str) -> bool {
        let result = (|| -> Result<bool, StoreError> {
            let mut guard = self.guard()?;
            let tx = guard.transaction()?;
            tx.execute("DELETE FROM events WHERE identity_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed > 0)
        })();

        match result {
            Ok(removed) => {
                if removed {
                    tracing::info!(id, "identity deleted");
                } else {
                    tracing::warn!(id, "delete requested for unknown identity");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(id, error = %e, "identity delete failed");
                false
            }
        }
    }

    /// True iff the most recent event for `id` is newer than the
    /// cooldown window. Identities with no events are never in
    /// cooldown.
    pub fn is_in_cooldown(&self, id: &str) -> Result<bool, StoreError> {
        let guard = self.guard()?;
        match last_event_time(&guard, id)? {
            Some(last) => Ok(self.clock.now() - last < self.cooldown),
            None => Ok(false),
        }
    }

    /// Append an attendance event unless the identity is in cooldown.
    ///
    /// Cooldown rejection is an expected outcome, not an error: the
    /// call returns `Ok(false)` and appends nothing. The cooldown
    /// check and the insert share one transaction, so concurrent
    /// callers cannot both pass the check.
    pub fn mark_attendance(&self, id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut guard = self.guard()?;
        let tx = guard.transaction()?;

        if let Some(last) = last_event_time(&tx, id)? {
            if now - last < self.cooldown {
                return Ok(false);
            }
        }

        tx.execute(
            "INSERT INTO events (identity_id, timestamp) VALUES (?1, ?2)",
            params![id, format_time(now)],
        )?;
        tx.commit()?;
        tracing::info!(id, timestamp = %format_time(now), "attendance marked");
        Ok(true)
    }

    /// Number of logged events for an identity.
    pub fn count_events(&self, id: &str) -> Result<u64, StoreError> {
        let count: u64 = self.guard()?.query_row(
            "SELECT COUNT(*) FROM events WHERE identity_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// The attendance log joined with identity names, newest first.
    pub fn attendance_log(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let guard = self.guard()?;
        let mut stmt = guard.prepare(
            "SELECT events.identity_id, identities.name, events.timestamp \
             FROM events JOIN identities ON events.identity_id = identities.id \
             ORDER BY events.timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (identity_id, name, ts) = row?;
            let timestamp = parse_time(&ts)?;
            records.push(AttendanceRecord {
                identity_id,
                name,
                timestamp,
            });
        }
        Ok(records)
    }

    /// Export the joined attendance log as CSV, newest first.
    pub fn export_csv<W: Write>(&self, mut writer: W) -> Result<(), StoreError> {
        writeln!(writer, "identity_id,name,timestamp")?;
        for record in self.attendance_log()? {
            writeln!(
                writer,
                "{},{},{}",
                csv_field(&record.identity_id),
                csv_field(&record.name),
                format_time(record.timestamp)
            )?;
        }
        Ok(())
    }
}

fn last_event_time(conn: &Connection, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let ts: Option<String> = conn
        .query_row(
            "SELECT timestamp FROM events WHERE identity_id = ?1 \
             ORDER BY timestamp DESC LIMIT 1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    ts.map(|s| parse_time(&s)).transpose()
}

/// Fixed-width RFC 3339 UTC so lexicographic order equals time order.
fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::CorruptTimestamp(s.to_string()))
}

/// Embeddings are stored as little-endian f32 bytes.
fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn decode_embedding(blob: &[u8]) -> Option<Embedding> {
    if blob.len() % 4 != 0 {
        return None;
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Embedding::new(values))
}

/// Minimal CSV quoting: wrap fields containing separators or quotes.
fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Settable clock for cooldown scenarios.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn starting_at(t: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(t)))
        }

        fn advance(&self, seconds: i64) {
            let mut guard = self.0.lock().unwrap();
            *guard += chrono::Duration::seconds(seconds);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.into(),
            name: format!("Person {id}"),
            embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
        }
    }

    fn store_with_clock(clock: Arc<dyn Clock>) -> AttendanceStore {
        AttendanceStore::open_in_memory(100, clock).unwrap()
    }

    #[test]
    fn test_add_and_list_identities() {
        let store = store_with_clock(ManualClock::starting_at(t0()));
        store.add_identity(&identity("E1")).unwrap();
        store.add_identity(&identity("E2")).unwrap();

        let roster = store.list_identities().unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, "E1");
        assert_eq!(roster[1].id, "E2");
        // Embedding survives the blob round trip.
        assert_eq!(roster[0].embedding.values, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = store_with_clock(ManualClock::starting_at(t0()));
        store.add_identity(&identity("E1")).unwrap();
        let err = store.add_identity(&identity("E1")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "E1"));
        // No partial write: roster unchanged.
        assert_eq!(store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_cooldown_scenario() {
        // mark at t=0 → true; t=50 → false; t=150 → true (cooldown 100s).
        let clock = ManualClock::starting_at(t0());
        let store = store_with_clock(clock.clone());
        store.add_identity(&identity("E1")).unwrap();

        assert!(store.mark_attendance("E1").unwrap());
        clock.advance(50);
        assert!(!store.mark_attendance("E1").unwrap());
        clock.advance(100); // t = 150
        assert!(store.mark_attendance("E1").unwrap());

        assert_eq!(store.count_events("E1").unwrap(), 2);
    }

    #[test]
    fn test_mark_enters_cooldown_immediately() {
        let clock = ManualClock::starting_at(t0());
        let store = store_with_clock(clock.clone());
        store.add_identity(&identity("E1")).unwrap();

        assert!(!store.is_in_cooldown("E1").unwrap());
        assert!(store.mark_attendance("E1").unwrap());
        assert!(store.is_in_cooldown("E1").unwrap());

        // Rejected mark appends nothing.
        assert!(!store.mark_attendance("E1").unwrap());
        assert_eq!(store.count_events("E1").unwrap(), 1);

        clock.advance(101);
        assert!(!store.is_in_cooldown("E1").unwrap());
    }

    #[test]
    fn test_no_events_never_in_cooldown() {
        let store = store_with_clock(ManualClock::starting_at(t0()));
        store.add_identity(&identity("E1")).unwrap();
        assert!(!store.is_in_cooldown("E1").unwrap());
        assert!(!store.is_in_cooldown("never-enrolled").unwrap());
    }

    #[test]
    fn test_cooldown_independent_per_identity() {
        let clock = ManualClock::starting_at(t0());
        let store = store_with_clock(clock.clone());
        store.add_identity(&identity("E1")).unwrap();
        store.add_identity(&identity("E2")).unwrap();

        assert!(store.mark_attendance("E1").unwrap());
        // E1's cooldown does not gate E2.
        assert!(store.mark_attendance("E2").unwrap());
        assert!(!store.mark_attendance("E1").unwrap());
    }

    #[test]
    fn test_delete_identity_removes_events() {
        let clock = ManualClock::starting_at(t0());
        let store = store_with_clock(clock.clone());
        store.add_identity(&identity("E1")).unwrap();
        store.mark_attendance("E1").unwrap();
        clock.advance(200);
        store.mark_attendance("E1").unwrap();

        assert!(store.delete_identity("E1"));
        assert!(store.list_identities().unwrap().is_empty());
        assert_eq!(store.count_events("E1").unwrap(), 0);
        assert!(store.attendance_log().unwrap().is_empty());
    }

    #[test]
    fn test_delete_nonexistent_reports_false() {
        let store = store_with_clock(ManualClock::starting_at(t0()));
        store.add_identity(&identity("E1")).unwrap();
        assert!(!store.delete_identity("ghost"));
        // No side effects.
        assert_eq!(store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_export_csv_newest_first() {
        let clock = ManualClock::starting_at(t0());
        let store = store_with_clock(clock.clone());
        store.add_identity(&identity("E1")).unwrap();
        store.add_identity(&identity("E2")).unwrap();

        store.mark_attendance("E1").unwrap();
        clock.advance(10);
        store.mark_attendance("E2").unwrap();

        let mut out = Vec::new();
        store.export_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "identity_id,name,timestamp");
        assert!(lines[1].starts_with("E2,Person E2,"));
        assert!(lines[2].starts_with("E1,Person E1,"));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let e = Embedding::new(vec![-1.5, 0.0, 3.25]);
        let decoded = decode_embedding(&encode_embedding(&e)).unwrap();
        assert_eq!(decoded.values, e.values);
    }

    #[test]
    fn test_corrupt_blob_rejected() {
        assert!(decode_embedding(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");

        {
            let store = AttendanceStore::open(&path, 100).unwrap();
            store.add_identity(&identity("E1")).unwrap();
            store.mark_attendance("E1").unwrap();
        }

        let store = AttendanceStore::open(&path, 100).unwrap();
        assert_eq!(store.list_identities().unwrap().len(), 1);
        assert_eq!(store.count_events("E1").unwrap(), 1);
        // Fresh process, recent event: still in cooldown.
        assert!(store.is_in_cooldown("E1").unwrap());
    }
}

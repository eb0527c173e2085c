//! rollcall-store: SQLite persistence for identities and attendance.
//!
//! Two tables: `users` keyed by unique name, holding profile fields and the
//! face embedding as little-endian `f32` bytes, and an append-only
//! `attendance` log of `(name, timestamp)` rows.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database not found at {0}")]
    NotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A `users` row with its decoded embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIdentity {
    pub name: String,
    pub age: i64,
    pub email: String,
    pub encoding: Vec<f32>,
}

/// An `attendance` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub name: String,
    pub timestamp: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|_| StoreError::NotFound(parent.display().to_string()))?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an existing database; never creates one.
    pub fn open_existing(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              name TEXT PRIMARY KEY,
              age INTEGER,
              email TEXT,
              face_encoding BLOB
            );

            CREATE TABLE IF NOT EXISTS attendance (
              name TEXT,
              timestamp TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_name ON attendance(name);
            "#,
        )?;
        Ok(())
    }

    /// All identities ordered by name. Rows whose embedding blob is not a
    /// whole number of `f32`s are skipped with a warning.
    pub fn load_identities(&self) -> Result<Vec<StoredIdentity>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, COALESCE(age, 0), COALESCE(email, ''), face_encoding FROM users ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, age, email, blob) = row?;
            match blob.as_deref().and_then(decode_embedding) {
                Some(encoding) => out.push(StoredIdentity {
                    name,
                    age,
                    email,
                    encoding,
                }),
                None => tracing::warn!(name = %name, "skipping user with malformed face encoding"),
            }
        }
        Ok(out)
    }

    pub fn identity(&self, name: &str) -> Result<Option<StoredIdentity>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT name, COALESCE(age, 0), COALESCE(email, ''), face_encoding FROM users WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(name, age, email, blob)| {
            let encoding = blob.as_deref().and_then(decode_embedding)?;
            Some(StoredIdentity {
                name,
                age,
                email,
                encoding,
            })
        }))
    }

    /// Insert or replace an identity by name.
    pub fn upsert_identity(&self, identity: &StoredIdentity) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO users (name, age, email, face_encoding) VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.name,
                identity.age,
                identity.email,
                encode_embedding(&identity.encoding)
            ],
        )?;
        Ok(())
    }

    /// Append one attendance row per name, all sharing `timestamp`, in a
    /// single transaction. Nothing is written if any insert fails.
    pub fn record_attendance(&self, names: &[String], timestamp: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO attendance (name, timestamp) VALUES (?1, ?2)")?;
            for name in names {
                stmt.execute(params![name, timestamp])?;
            }
        }
        tx.commit()?;
        Ok(names.len())
    }

    /// Attendance log, newest first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, timestamp FROM attendance ORDER BY timestamp DESC, rowid DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRow {
                name: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete users and their attendance history. Returns the number of
    /// users removed.
    pub fn delete_identities(&self, names: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for name in names {
            removed += tx.execute("DELETE FROM users WHERE name = ?1", params![name])?;
            tx.execute("DELETE FROM attendance WHERE name = ?1", params![name])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` unless the blob is a non-empty whole number of `f32`s.
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, encoding: Vec<f32>) -> StoredIdentity {
        StoredIdentity {
            name: name.into(),
            age: 30,
            email: format!("{}@example.com", name.to_lowercase()),
            encoding,
        }
    }

    #[test]
    fn test_embedding_bytes_are_little_endian_f32() {
        let bytes = encode_embedding(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&bytes), Some(vec![1.0, -2.5]));
        assert_eq!(decode_embedding(&bytes[..7]), None);
        assert_eq!(decode_embedding(&[]), None);
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_identity(&identity("Bob", vec![0.0, 1.0])).unwrap();
        store.upsert_identity(&identity("Alice", vec![1.0, 0.0])).unwrap();
        store.upsert_identity(&identity("Bob", vec![0.5, 0.5])).unwrap();

        let all = store.load_identities().unwrap();
        let names: Vec<_> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(all[1].encoding, vec![0.5, 0.5]);
        assert_eq!(store.identity("Bob").unwrap().unwrap().encoding, vec![0.5, 0.5]);
        assert!(store.identity("Carol").unwrap().is_none());
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_identity(&identity("Alice", vec![1.0, 0.0])).unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO users VALUES ('Broken', 1, '', x'010203')",
                [],
            )
            .unwrap();

        let all = store.load_identities().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Alice");
    }

    #[test]
    fn test_attendance_batch_shares_timestamp() {
        let store = Store::open_in_memory().unwrap();
        let names = vec!["Alice".to_string(), "Bob".to_string()];
        assert_eq!(store.record_attendance(&names, "2026-01-05 09:00:00").unwrap(), 2);

        let rows = store.list_attendance().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.timestamp == "2026-01-05 09:00:00"));
    }

    #[test]
    fn test_attendance_is_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.record_attendance(&["Alice".to_string()], "2026-01-05 09:00:00").unwrap();
        store.record_attendance(&["Bob".to_string()], "2026-01-06 09:00:00").unwrap();
        let rows = store.list_attendance().unwrap();
        assert_eq!(rows[0].name, "Bob");
        assert_eq!(rows[1].name, "Alice");
    }

    #[test]
    fn test_delete_removes_user_and_history() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_identity(&identity("Alice", vec![1.0])).unwrap();
        store.upsert_identity(&identity("Bob", vec![2.0])).unwrap();
        store
            .record_attendance(&["Alice".to_string(), "Bob".to_string()], "2026-01-05 09:00:00")
            .unwrap();

        let removed = store
            .delete_identities(&["Alice".to_string(), "Nobody".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.load_identities().unwrap().len(), 1);
        let rows = store.list_attendance().unwrap();
        assert_eq!(rows, vec![AttendanceRow { name: "Bob".into(), timestamp: "2026-01-05 09:00:00".into() }]);
    }

    #[test]
    fn test_open_existing_refuses_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(matches!(Store::open_existing(&path), Err(StoreError::NotFound(_))));

        let created = dir.path().join("nested/face_recognition.db");
        Store::open(&created).unwrap();
        assert!(Store::open_existing(&created).is_ok());
    }
}

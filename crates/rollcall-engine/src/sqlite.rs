//! SQLite-backed store.
//!
//! One connection behind a mutex, called from the engine thread only.
//! The `(student_id, class_id, date)` uniqueness constraint is the
//! cross-request ordering guarantee for duplicate check-ins: a losing
//! racer gets `DuplicateRecord` back, never a crash.

use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use rollcall_core::types::{AttendanceRecord, ClassSession};
use rollcall_vault::EnrolledProfile;
use rusqlite::{params, Connection, OptionalExtension};

use crate::stores::{AttendanceStore, EnrollmentStore, SessionStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    profile TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    class_id TEXT NOT NULL,
    date     TEXT NOT NULL,
    session  TEXT NOT NULL,
    PRIMARY KEY (class_id, date)
);
CREATE TABLE IF NOT EXISTS attendance (
    student_id TEXT NOT NULL,
    class_id   TEXT NOT NULL,
    date       TEXT NOT NULL,
    record     TEXT NOT NULL,
    UNIQUE (student_id, class_id, date)
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock");
        f(&conn).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicateRecord
            }
            other => backend(other),
        })
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, rusqlite::Error> {
    serde_json::to_string(value)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(json: String) -> Result<T, rusqlite::Error> {
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl EnrollmentStore for SqliteStore {
    fn get_profile(&self, user_id: &str) -> Result<Option<EnrolledProfile>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT profile FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(from_json)
            .transpose()
        })
    }

    fn put_profile(&self, profile: &EnrolledProfile) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let json = to_json(profile)?;
            conn.execute(
                "INSERT INTO profiles (user_id, profile) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET profile = excluded.profile",
                params![profile.user_id, json],
            )?;
            Ok(())
        })
    }

    fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM profiles WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
    }
}

impl SessionStore for SqliteStore {
    fn get_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ClassSession>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT session FROM sessions WHERE class_id = ?1 AND date = ?2",
                params![class_id, date.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(from_json)
            .transpose()
        })
    }

    fn put_session(&self, session: &ClassSession) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let json = to_json(session)?;
            conn.execute(
                "INSERT INTO sessions (class_id, date, session) VALUES (?1, ?2, ?3)
                 ON CONFLICT (class_id, date) DO UPDATE SET session = excluded.session",
                params![session.class_id, session.date.to_string(), json],
            )?;
            Ok(())
        })
    }
}

impl AttendanceStore for SqliteStore {
    fn find_record(
        &self,
        student_id: &str,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT record FROM attendance
                 WHERE student_id = ?1 AND class_id = ?2 AND date = ?3",
                params![student_id, class_id, date.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(from_json)
            .transpose()
        })
    }

    fn insert_record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let json = to_json(record)?;
            conn.execute(
                "INSERT INTO attendance (student_id, class_id, date, record)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.student_id,
                    record.class_id,
                    record.date.to_string(),
                    json
                ],
            )?;
            Ok(())
        })
    }
}

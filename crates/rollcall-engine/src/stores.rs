//! Store traits for the engine's external collaborators.
//!
//! Persistence of records, sessions, and profiles is owned elsewhere;
//! the engine only depends on these narrow traits. [`MemoryStore`] is
//! the in-process implementation used by tests and demo mode.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use rollcall_core::types::{AttendanceRecord, ClassSession};
use rollcall_vault::EnrolledProfile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A record already exists for the `(student, class, date)` key.
    /// The backing store enforces this atomically; the engine treats
    /// it as an ordinary outcome, never a crash.
    #[error("attendance record already exists")]
    DuplicateRecord,
    #[error("store backend: {0}")]
    Backend(String),
}

pub trait EnrollmentStore: Send + Sync {
    fn get_profile(&self, user_id: &str) -> Result<Option<EnrolledProfile>, StoreError>;
    /// Replaces any existing profile wholesale.
    fn put_profile(&self, profile: &EnrolledProfile) -> Result<(), StoreError>;
    fn delete_profile(&self, user_id: &str) -> Result<(), StoreError>;
}

pub trait SessionStore: Send + Sync {
    fn get_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ClassSession>, StoreError>;
    /// Upsert, used by scheduling ingest and ops tooling.
    fn put_session(&self, session: &ClassSession) -> Result<(), StoreError>;
}

pub trait AttendanceStore: Send + Sync {
    fn find_record(
        &self,
        student_id: &str,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;
    /// Insert with an atomic uniqueness guarantee on
    /// `(student_id, class_id, date)`; a second insert for the same key
    /// must return [`StoreError::DuplicateRecord`].
    fn insert_record(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
}

type RecordKey = (String, String, NaiveDate);

/// In-memory store backing all three traits.
#[derive(Default)]
pub struct MemoryStore {
    profiles: RwLock<HashMap<String, EnrolledProfile>>,
    sessions: RwLock<HashMap<(String, NaiveDate), ClassSession>>,
    records: RwLock<HashMap<RecordKey, AttendanceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored attendance records (test support).
    pub fn record_count(&self) -> usize {
        self.records.read().expect("records lock").len()
    }
}

impl EnrollmentStore for MemoryStore {
    fn get_profile(&self, user_id: &str) -> Result<Option<EnrolledProfile>, StoreError> {
        Ok(self.profiles.read().expect("profiles lock").get(user_id).cloned())
    }

    fn put_profile(&self, profile: &EnrolledProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .expect("profiles lock")
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.profiles.write().expect("profiles lock").remove(user_id);
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn get_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ClassSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .expect("sessions lock")
            .get(&(class_id.to_string(), date))
            .cloned())
    }

    fn put_session(&self, session: &ClassSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .expect("sessions lock")
            .insert((session.class_id.clone(), session.date), session.clone());
        Ok(())
    }
}

impl AttendanceStore for MemoryStore {
    fn find_record(
        &self,
        student_id: &str,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let key = (student_id.to_string(), class_id.to_string(), date);
        Ok(self.records.read().expect("records lock").get(&key).cloned())
    }

    fn insert_record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let key = (
            record.student_id.clone(),
            record.class_id.clone(),
            record.date,
        );
        let mut records = self.records.write().expect("records lock");
        if records.contains_key(&key) {
            return Err(StoreError::DuplicateRecord);
        }
        records.insert(key, record.clone());
        Ok(())
    }
}

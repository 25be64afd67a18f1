//! The meeting record store.
//!
//! Three operations are all the lifecycle needs: create-if-absent, a
//! status-guarded conditional update, and point reads. Every transition goes
//! through the conditional update so concurrent or redelivered callbacks
//! cannot clobber each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use meetconfirm_core::{MeetingRecord, MeetingStatus};

use crate::db::{from_millis, to_millis, Database};
use crate::error::StoreError;

/// Result of `create_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record with this id was already stored; it is returned unchanged.
    AlreadyExists(MeetingRecord),
}

/// Durable keyed storage of meeting records with conditional writes.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    /// Insert `record` unless its id is already present.
    async fn create_if_absent(&self, record: &MeetingRecord) -> Result<CreateOutcome, StoreError>;

    /// Replace the record's status (and `updated_at`) with `next`'s, but only
    /// if the stored status still equals `expected`.
    ///
    /// Fails with `StoreError::StatusMismatch` when the status moved on and
    /// `StoreError::NotFound` when there is no such record.
    async fn conditional_update(
        &self,
        meeting_id: &str,
        expected: MeetingStatus,
        next: &MeetingRecord,
    ) -> Result<MeetingRecord, StoreError>;

    async fn get(&self, meeting_id: &str) -> Result<Option<MeetingRecord>, StoreError>;
}

fn check_same_id(meeting_id: &str, next: &MeetingRecord) -> Result<(), StoreError> {
    if next.meeting_id != meeting_id {
        return Err(StoreError::InvalidRequest(format!(
            "update for {} carries record {}",
            meeting_id, next.meeting_id
        )));
    }
    Ok(())
}

// =============================================================================
// SQLite
// =============================================================================

/// `MeetingStore` backed by the `meetings` table.
pub struct SqliteMeetingStore {
    db: Arc<Database>,
}

impl SqliteMeetingStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

const SELECT_MEETING: &str = "SELECT meeting_id, status, title, scheduled_start, scheduled_end,
        confirm_send_at, enforce_at, attendee_ref, created_at, updated_at
     FROM meetings WHERE meeting_id = ?1";

struct RawMeetingRow {
    meeting_id: String,
    status: String,
    title: String,
    scheduled_start: i64,
    scheduled_end: i64,
    confirm_send_at: i64,
    enforce_at: i64,
    attendee_ref: String,
    created_at: i64,
    updated_at: i64,
}

impl RawMeetingRow {
    fn into_record(self) -> Result<MeetingRecord, StoreError> {
        let key = self.meeting_id.as_str();
        let status = self
            .status
            .parse::<MeetingStatus>()
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(MeetingRecord {
            status,
            title: self.title.clone(),
            scheduled_start: from_millis(key, self.scheduled_start)?,
            scheduled_end: from_millis(key, self.scheduled_end)?,
            confirm_send_at: from_millis(key, self.confirm_send_at)?,
            enforce_at: from_millis(key, self.enforce_at)?,
            attendee_ref: self.attendee_ref.clone(),
            created_at: from_millis(key, self.created_at)?,
            updated_at: from_millis(key, self.updated_at)?,
            meeting_id: self.meeting_id,
        })
    }
}

fn select_record(conn: &Connection, meeting_id: &str) -> Result<Option<MeetingRecord>, StoreError> {
    let raw = conn
        .query_row(SELECT_MEETING, rusqlite::params![meeting_id], |row| {
            Ok(RawMeetingRow {
                meeting_id: row.get(0)?,
                status: row.get(1)?,
                title: row.get(2)?,
                scheduled_start: row.get(3)?,
                scheduled_end: row.get(4)?,
                confirm_send_at: row.get(5)?,
                enforce_at: row.get(6)?,
                attendee_ref: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })
        .optional()?;
    raw.map(RawMeetingRow::into_record).transpose()
}

#[async_trait]
impl MeetingStore for SqliteMeetingStore {
    async fn create_if_absent(&self, record: &MeetingRecord) -> Result<CreateOutcome, StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO meetings (meeting_id, status, title, scheduled_start, scheduled_end,
                                       confirm_send_at, enforce_at, attendee_ref, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(meeting_id) DO NOTHING",
                rusqlite::params![
                    record.meeting_id,
                    record.status.as_str(),
                    record.title,
                    to_millis(record.scheduled_start),
                    to_millis(record.scheduled_end),
                    to_millis(record.confirm_send_at),
                    to_millis(record.enforce_at),
                    record.attendee_ref,
                    to_millis(record.created_at),
                    to_millis(record.updated_at),
                ],
            )?;

            if inserted == 1 {
                debug!(meeting_id = %record.meeting_id, "Meeting record created");
                return Ok(CreateOutcome::Created);
            }

            match select_record(conn, &record.meeting_id)? {
                Some(existing) => Ok(CreateOutcome::AlreadyExists(existing)),
                None => Err(StoreError::Unavailable(format!(
                    "insert of {} conflicted but no row was found",
                    record.meeting_id
                ))),
            }
        })
    }

    async fn conditional_update(
        &self,
        meeting_id: &str,
        expected: MeetingStatus,
        next: &MeetingRecord,
    ) -> Result<MeetingRecord, StoreError> {
        check_same_id(meeting_id, next)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE meetings SET status = ?1, updated_at = ?2
                 WHERE meeting_id = ?3 AND status = ?4",
                rusqlite::params![
                    next.status.as_str(),
                    to_millis(next.updated_at),
                    meeting_id,
                    expected.as_str(),
                ],
            )?;

            let current = select_record(conn, meeting_id)?
                .ok_or_else(|| StoreError::NotFound(meeting_id.to_string()))?;

            if changed == 0 {
                return Err(StoreError::StatusMismatch {
                    meeting_id: meeting_id.to_string(),
                    expected,
                    actual: current.status,
                });
            }
            Ok(current)
        })
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<MeetingRecord>, StoreError> {
        self.db.with_conn(|conn| select_record(conn, meeting_id))
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// `MeetingStore` over a `HashMap`, for tests and ephemeral runs.
///
/// `set_unavailable(true)` makes every call fail with a transient error.
#[derive(Default)]
pub struct MemoryMeetingStore {
    records: Mutex<HashMap<String, MeetingRecord>>,
    unavailable: AtomicBool,
}

impl MemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MeetingRecord>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        self.records
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

#[async_trait]
impl MeetingStore for MemoryMeetingStore {
    async fn create_if_absent(&self, record: &MeetingRecord) -> Result<CreateOutcome, StoreError> {
        let mut records = self.lock()?;
        if let Some(existing) = records.get(&record.meeting_id) {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }
        records.insert(record.meeting_id.clone(), record.clone());
        Ok(CreateOutcome::Created)
    }

    async fn conditional_update(
        &self,
        meeting_id: &str,
        expected: MeetingStatus,
        next: &MeetingRecord,
    ) -> Result<MeetingRecord, StoreError> {
        check_same_id(meeting_id, next)?;
        let mut records = self.lock()?;
        let current = records
            .get_mut(meeting_id)
            .ok_or_else(|| StoreError::NotFound(meeting_id.to_string()))?;
        if current.status != expected {
            return Err(StoreError::StatusMismatch {
                meeting_id: meeting_id.to_string(),
                expected,
                actual: current.status,
            });
        }
        current.status = next.status;
        current.updated_at = next.updated_at;
        Ok(current.clone())
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<MeetingRecord>, StoreError> {
        Ok(self.lock()?.get(meeting_id).cloned())
    }
}

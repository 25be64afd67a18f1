//! Durable table of one-shot delayed tasks for the local scheduler backend.
//!
//! The task name is the primary key, so inserting a name twice is detected
//! rather than creating a duplicate. Rows are never deleted: finished tasks
//! keep their name reserved the same way a hosted queue tombstones names.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use tracing::debug;

use meetconfirm_core::TaskKind;

use crate::db::{from_millis, to_millis, Database};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for `run_at`, or waiting for a retry.
    Pending,
    Done,
    /// Gave up; will not be delivered again.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "done" => Ok(TaskState::Done),
            "failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state: {}", other)),
        }
    }
}

/// A task to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScheduledTask {
    pub name: String,
    pub kind: TaskKind,
    pub meeting_id: String,
    pub run_at: DateTime<Utc>,
}

/// A stored task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTaskRow {
    pub name: String,
    pub kind: TaskKind,
    pub meeting_id: String,
    pub run_at: DateTime<Utc>,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_TASK: &str = "SELECT name, kind, meeting_id, run_at, state, attempts, last_error,
        created_at, updated_at
     FROM scheduled_tasks";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Result<ScheduledTaskRow, StoreError>> {
    let name: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let state: String = row.get(4)?;
    let run_at: i64 = row.get(3)?;
    let created_at: i64 = row.get(7)?;
    let updated_at: i64 = row.get(8)?;
    let meeting_id: String = row.get(2)?;
    let attempts: u32 = row.get(5)?;
    let last_error: Option<String> = row.get(6)?;
    Ok(decode_task(
        name, &kind, &state, meeting_id, run_at, attempts, last_error, created_at, updated_at,
    ))
}

#[allow(clippy::too_many_arguments)]
fn decode_task(
    name: String,
    kind: &str,
    state: &str,
    meeting_id: String,
    run_at: i64,
    attempts: u32,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
) -> Result<ScheduledTaskRow, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: name.clone(),
        reason,
    };
    let kind = kind.parse::<TaskKind>().map_err(|e| corrupt(e.to_string()))?;
    let state = state.parse::<TaskState>().map_err(corrupt)?;
    Ok(ScheduledTaskRow {
        kind,
        state,
        meeting_id,
        run_at: from_millis(&name, run_at)?,
        attempts,
        last_error,
        created_at: from_millis(&name, created_at)?,
        updated_at: from_millis(&name, updated_at)?,
        name,
    })
}

/// Repository for the `scheduled_tasks` table.
pub struct ScheduledTaskRepository {
    db: Arc<Database>,
}

impl ScheduledTaskRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a pending task. Returns `false` if the name is already taken.
    pub fn insert(&self, task: &NewScheduledTask, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO scheduled_tasks (name, kind, meeting_id, run_at, state, attempts,
                                              created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)
                 ON CONFLICT(name) DO NOTHING",
                rusqlite::params![
                    task.name,
                    task.kind.slug(),
                    task.meeting_id,
                    to_millis(task.run_at),
                    to_millis(now),
                ],
            )?;
            if inserted == 1 {
                debug!(task = %task.name, run_at = %task.run_at, "Scheduled task stored");
            }
            Ok(inserted == 1)
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<ScheduledTaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE name = ?1", SELECT_TASK),
                rusqlite::params![name],
                row_to_task,
            )
            .optional()?
            .transpose()
        })
    }

    /// Pending tasks whose `run_at` is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduledTaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE state = 'pending' AND run_at <= ?1 ORDER BY run_at ASC LIMIT ?2",
                SELECT_TASK
            ))?;
            let rows = stmt.query_map(rusqlite::params![to_millis(now), limit], row_to_task)?;

            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row??);
            }
            Ok(tasks)
        })
    }

    /// Earliest `run_at` among pending tasks.
    pub fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            let next: Option<i64> = conn.query_row(
                "SELECT MIN(run_at) FROM scheduled_tasks WHERE state = 'pending'",
                [],
                |row| row.get(0),
            )?;
            next.map(|ms| from_millis("scheduled_tasks", ms)).transpose()
        })
    }

    pub fn mark_done(&self, name: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.set_state(name, TaskState::Done, None, now)
    }

    pub fn mark_failed(&self, name: &str, error: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.set_state(name, TaskState::Failed, Some(error), now)
    }

    /// Push a pending task back to `run_at` after a failed attempt.
    pub fn reschedule(
        &self,
        name: &str,
        run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks
                 SET run_at = ?1, attempts = attempts + 1, last_error = ?2, updated_at = ?3
                 WHERE name = ?4 AND state = 'pending'",
                rusqlite::params![to_millis(run_at), error, to_millis(now), name],
            )?;
            Ok(())
        })
    }

    pub fn count_by_state(&self, state: TaskState) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scheduled_tasks WHERE state = ?1",
                rusqlite::params![state.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn set_state(
        &self,
        name: &str,
        state: TaskState,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks
                 SET state = ?1, attempts = attempts + 1,
                     last_error = COALESCE(?2, last_error), updated_at = ?3
                 WHERE name = ?4",
                rusqlite::params![state.as_str(), error, to_millis(now), name],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn repo() -> ScheduledTaskRepository {
        ScheduledTaskRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn task(name: &str, kind: TaskKind, run_at: DateTime<Utc>) -> NewScheduledTask {
        NewScheduledTask {
            name: name.to_string(),
            kind,
            meeting_id: "evt-1".to_string(),
            run_at,
        }
    }

    #[test]
    fn test_insert_detects_name_collision() {
        let repo = repo();
        let t = task("send-confirm-a", TaskKind::SendConfirmation, t0());
        assert!(repo.insert(&t, t0()).unwrap());
        assert!(!repo.insert(&t, t0()).unwrap());

        // Finished tasks keep their name reserved.
        repo.mark_done("send-confirm-a", t0()).unwrap();
        assert!(!repo.insert(&t, t0()).unwrap());
    }

    #[test]
    fn test_due_returns_only_ripe_pending_tasks_in_order() {
        let repo = repo();
        repo.insert(&task("b", TaskKind::EnforceDeadline, t0() + Duration::hours(1)), t0())
            .unwrap();
        repo.insert(&task("a", TaskKind::SendConfirmation, t0()), t0())
            .unwrap();
        repo.insert(&task("c", TaskKind::EnforceDeadline, t0() + Duration::hours(5)), t0())
            .unwrap();
        repo.insert(&task("d", TaskKind::SendConfirmation, t0()), t0())
            .unwrap();
        repo.mark_done("d", t0()).unwrap();

        let due = repo.due(t0() + Duration::hours(1), 10).unwrap();
        let names: Vec<&str> = due.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(due[1].kind, TaskKind::EnforceDeadline);
        assert_eq!(due[0].state, TaskState::Pending);
    }

    #[test]
    fn test_next_run_at() {
        let repo = repo();
        assert_eq!(repo.next_run_at().unwrap(), None);

        repo.insert(&task("x", TaskKind::EnforceDeadline, t0() + Duration::hours(3)), t0())
            .unwrap();
        repo.insert(&task("y", TaskKind::SendConfirmation, t0() + Duration::hours(2)), t0())
            .unwrap();
        assert_eq!(repo.next_run_at().unwrap(), Some(t0() + Duration::hours(2)));
    }

    #[test]
    fn test_reschedule_increments_attempts() {
        let repo = repo();
        repo.insert(&task("r", TaskKind::SendConfirmation, t0()), t0())
            .unwrap();
        let later = t0() + Duration::minutes(1);
        repo.reschedule("r", later, "email unavailable", t0()).unwrap();

        let row = repo.get("r").unwrap().unwrap();
        assert_eq!(row.run_at, later);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.last_error.as_deref(), Some("email unavailable"));
        assert!(repo.due(t0(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_failed() {
        let repo = repo();
        repo.insert(&task("f", TaskKind::EnforceDeadline, t0()), t0())
            .unwrap();
        repo.mark_failed("f", "malformed meeting id", t0()).unwrap();

        let row = repo.get("f").unwrap().unwrap();
        assert_eq!(row.state, TaskState::Failed);
        assert_eq!(repo.count_by_state(TaskState::Failed).unwrap(), 1);
        assert_eq!(repo.count_by_state(TaskState::Pending).unwrap(), 0);
        assert_eq!(repo.next_run_at().unwrap(), None);
    }
}

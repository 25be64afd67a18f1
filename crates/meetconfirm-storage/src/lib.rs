//! MeetConfirm storage crate - SQLite persistence for meeting lifecycle state.
//!
//! Provides a WAL-mode SQLite database with migrations, the `MeetingStore`
//! contract (create-if-absent, status-guarded conditional update, get) with
//! SQLite and in-memory implementations, the audit trail and notification
//! log, and the durable table behind the local delayed-task service.

pub mod audit;
pub mod db;
pub mod error;
pub mod meetings;
pub mod migrations;
pub mod tasks;

pub use audit::{AuditEntry, AuditLog, MemoryAuditLog, NotificationEntry, SqliteAuditLog};
pub use db::Database;
pub use error::StoreError;
pub use meetings::{CreateOutcome, MeetingStore, MemoryMeetingStore, SqliteMeetingStore};
pub use tasks::{NewScheduledTask, ScheduledTaskRepository, ScheduledTaskRow, TaskState};

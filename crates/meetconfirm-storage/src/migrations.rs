//! Database schema migrations.
//!
//! Version 1 creates the meetings, audit_log, notifications and
//! scheduled_tasks tables. Versions are tracked in schema_migrations.

use rusqlite::Connection;
use tracing::info;

use meetconfirm_core::MeetConfirmError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), MeetConfirmError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| {
        MeetConfirmError::Storage(format!("Failed to create migrations table: {}", e))
    })?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            MeetConfirmError::Storage(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema. Timestamps are Unix milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), MeetConfirmError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meetings (
            meeting_id      TEXT PRIMARY KEY NOT NULL,
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'confirmation_sent', 'confirmed',
                                              'cancelled_by_user', 'cancelled_by_system')),
            title           TEXT NOT NULL DEFAULT '',
            scheduled_start INTEGER NOT NULL,
            scheduled_end   INTEGER NOT NULL,
            confirm_send_at INTEGER NOT NULL,
            enforce_at      INTEGER NOT NULL,
            attendee_ref    TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_meetings_status
            ON meetings (status, scheduled_start ASC);

        CREATE TABLE IF NOT EXISTS audit_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id      TEXT NOT NULL,
            action          TEXT NOT NULL,
            detail          TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_meeting
            ON audit_log (meeting_id, id ASC);

        CREATE TABLE IF NOT EXISTS notifications (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id      TEXT NOT NULL,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('confirm_request', 'cancel_notice')),
            channel         TEXT NOT NULL DEFAULT 'email',
            recipient       TEXT NOT NULL,
            sent_at         INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_meeting
            ON notifications (meeting_id, id ASC);

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            name            TEXT PRIMARY KEY NOT NULL,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('send-confirm', 'enforce')),
            meeting_id      TEXT NOT NULL,
            run_at          INTEGER NOT NULL,
            state           TEXT NOT NULL DEFAULT 'pending'
                            CHECK (state IN ('pending', 'done', 'failed')),
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
            ON scheduled_tasks (state, run_at ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| MeetConfirmError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

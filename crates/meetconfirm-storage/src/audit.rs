//! Append-only audit trail and notification log.
//!
//! Writers treat these as best-effort: a failed append is logged by the
//! caller and never blocks a lifecycle transition.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meetconfirm_core::NotificationKind;

use crate::db::{from_millis, to_millis, Database};
use crate::error::StoreError;

/// One audit trail line for a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub meeting_id: String,
    /// Short machine-readable label, e.g. `confirmed` or `token_rejected`.
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        meeting_id: impl Into<String>,
        action: impl Into<String>,
        detail: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            action: action.into(),
            detail,
            created_at,
        }
    }
}

/// A sent email, as recorded in the notification log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub meeting_id: String,
    pub kind: NotificationKind,
    pub channel: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationEntry {
    pub fn email(
        meeting_id: impl Into<String>,
        kind: NotificationKind,
        recipient: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            kind,
            channel: "email".to_string(),
            recipient: recipient.into(),
            sent_at,
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn record_notification(&self, entry: &NotificationEntry) -> Result<(), StoreError>;

    /// Audit entries for a meeting, oldest first.
    async fn history(&self, meeting_id: &str) -> Result<Vec<AuditEntry>, StoreError>;

    /// Notifications sent for a meeting, oldest first.
    async fn notifications(&self, meeting_id: &str) -> Result<Vec<NotificationEntry>, StoreError>;
}

/// `AuditLog` over the `audit_log` and `notifications` tables.
pub struct SqliteAuditLog {
    db: Arc<Database>,
}

impl SqliteAuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let detail = entry.detail.to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log (meeting_id, action, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    entry.meeting_id,
                    entry.action,
                    detail,
                    to_millis(entry.created_at)
                ],
            )?;
            Ok(())
        })
    }

    async fn record_notification(&self, entry: &NotificationEntry) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (meeting_id, kind, channel, recipient, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.meeting_id,
                    entry.kind.as_str(),
                    entry.channel,
                    entry.recipient,
                    to_millis(entry.sent_at)
                ],
            )?;
            Ok(())
        })
    }

    async fn history(&self, meeting_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT action, detail, created_at FROM audit_log
                 WHERE meeting_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![meeting_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (action, detail, created_at) = row?;
                let detail = serde_json::from_str(&detail).map_err(|e| StoreError::Corrupt {
                    key: meeting_id.to_string(),
                    reason: format!("audit detail: {}", e),
                })?;
                entries.push(AuditEntry {
                    meeting_id: meeting_id.to_string(),
                    action,
                    detail,
                    created_at: from_millis(meeting_id, created_at)?,
                });
            }
            Ok(entries)
        })
    }

    async fn notifications(&self, meeting_id: &str) -> Result<Vec<NotificationEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, channel, recipient, sent_at FROM notifications
                 WHERE meeting_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![meeting_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (kind, channel, recipient, sent_at) = row?;
                let kind = kind
                    .parse::<NotificationKind>()
                    .map_err(|e| StoreError::Corrupt {
                        key: meeting_id.to_string(),
                        reason: e.to_string(),
                    })?;
                entries.push(NotificationEntry {
                    meeting_id: meeting_id.to_string(),
                    kind,
                    channel,
                    recipient,
                    sent_at: from_millis(meeting_id, sent_at)?,
                });
            }
            Ok(entries)
        })
    }
}

/// In-memory `AuditLog` for tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    notifications: Mutex<Vec<NotificationEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit entry recorded so far, across meetings.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable(format!("lock poisoned: {}", e))
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.entries.lock().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    async fn record_notification(&self, entry: &NotificationEntry) -> Result<(), StoreError> {
        self.notifications
            .lock()
            .map_err(poisoned)?
            .push(entry.clone());
        Ok(())
    }

    async fn history(&self, meeting_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|e| e.meeting_id == meeting_id)
            .cloned()
            .collect())
    }

    async fn notifications(&self, meeting_id: &str) -> Result<Vec<NotificationEntry>, StoreError> {
        Ok(self
            .notifications
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|n| n.meeting_id == meeting_id)
            .cloned()
            .collect())
    }
}

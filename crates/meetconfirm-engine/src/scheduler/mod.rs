//! Idempotent one-shot scheduling of the per-meeting deferred tasks.
//!
//! Every (meeting, task kind) pair maps to one deterministic task name. The
//! delayed-task service rejects a second task with the same name, and the
//! client reports that collision as success. Duplicate webhook deliveries
//! therefore never produce two live tasks for the same step.

pub mod local;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use meetconfirm_core::TaskKind;

use crate::error::SchedulerError;

pub use local::{LocalTaskQueue, TaskRunner};
pub use memory::MemoryTaskService;

/// One deferred callback to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Deterministic name; the dedup key.
    pub name: String,
    pub kind: TaskKind,
    pub meeting_id: String,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateTaskError {
    #[error("task already exists")]
    AlreadyExists,
    #[error("delayed-task service unavailable: {0}")]
    Unavailable(String),
    #[error("delayed-task service rejected the task: {0}")]
    Rejected(String),
}

/// An at-least-once delayed execution service with name-based dedup on creation.
#[async_trait]
pub trait DelayedTaskService: Send + Sync {
    async fn create_task(&self, request: &TaskRequest) -> Result<(), CreateTaskError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// A task with this name was created earlier.
    AlreadyScheduled,
}

/// Deterministic task name for a meeting's deferred step.
///
/// Meeting ids are opaque provider strings, so they are hashed into the
/// `[a-z0-9-]` alphabet hosted queues accept in task names.
pub fn task_name(meeting_id: &str, kind: TaskKind) -> String {
    let digest = Sha256::digest(meeting_id.as_bytes());
    format!("{}-{}", kind.slug(), hex::encode(digest))
}

/// Wraps a `DelayedTaskService` with schedule-once semantics.
#[derive(Clone)]
pub struct SchedulerClient {
    service: Arc<dyn DelayedTaskService>,
}

impl SchedulerClient {
    pub fn new(service: Arc<dyn DelayedTaskService>) -> Self {
        Self { service }
    }

    /// Create the `kind` task for `meeting_id` at `run_at`, unless it already exists.
    pub async fn schedule_once(
        &self,
        meeting_id: &str,
        kind: TaskKind,
        run_at: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let request = TaskRequest {
            name: task_name(meeting_id, kind),
            kind,
            meeting_id: meeting_id.to_string(),
            run_at,
        };

        match self.service.create_task(&request).await {
            Ok(()) => {
                debug!(meeting_id, task = %request.name, %run_at, "Task scheduled");
                Ok(ScheduleOutcome::Scheduled)
            }
            Err(CreateTaskError::AlreadyExists) => {
                debug!(meeting_id, task = %request.name, "Task already scheduled");
                Ok(ScheduleOutcome::AlreadyScheduled)
            }
            Err(CreateTaskError::Unavailable(reason)) => {
                warn!(meeting_id, task = %request.name, error = %reason, "Task creation failed");
                Err(SchedulerError::Unavailable(reason))
            }
            Err(CreateTaskError::Rejected(reason)) => {
                warn!(meeting_id, task = %request.name, error = %reason, "Task creation rejected");
                Err(SchedulerError::Rejected {
                    name: request.name,
                    reason,
                })
            }
        }
    }
}

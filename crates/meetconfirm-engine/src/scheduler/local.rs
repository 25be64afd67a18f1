//! SQLite-backed delayed-task queue and the background runner that drains it.
//!
//! Used when no hosted task queue is configured. Task names are the primary
//! key of `scheduled_tasks`, so creation dedup comes from the table itself.
//! The runner delivers due tasks straight to the orchestrator; failed
//! deliveries that may succeed later are pushed back by the retry backoff.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use meetconfirm_storage::{NewScheduledTask, ScheduledTaskRepository, ScheduledTaskRow};

use super::{CreateTaskError, DelayedTaskService, TaskRequest};
use crate::clock::Clock;
use crate::orchestrator::Orchestrator;

/// Tasks claimed per pass of the runner.
const BATCH_SIZE: u32 = 50;

pub struct LocalTaskQueue {
    repo: ScheduledTaskRepository,
    clock: Arc<dyn Clock>,
    wake: Notify,
}

impl LocalTaskQueue {
    pub fn new(repo: ScheduledTaskRepository, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            wake: Notify::new(),
        }
    }

    pub fn repository(&self) -> &ScheduledTaskRepository {
        &self.repo
    }
}

#[async_trait]
impl DelayedTaskService for LocalTaskQueue {
    async fn create_task(&self, request: &TaskRequest) -> Result<(), CreateTaskError> {
        let task = NewScheduledTask {
            name: request.name.clone(),
            kind: request.kind,
            meeting_id: request.meeting_id.clone(),
            run_at: request.run_at,
        };
        let inserted = self
            .repo
            .insert(&task, self.clock.now())
            .map_err(|e| CreateTaskError::Unavailable(e.to_string()))?;
        if !inserted {
            return Err(CreateTaskError::AlreadyExists);
        }
        // The runner may be sleeping past this task's run time.
        self.wake.notify_one();
        Ok(())
    }
}

/// Background loop delivering due local tasks to the orchestrator.
pub struct TaskRunner {
    queue: Arc<LocalTaskQueue>,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    poll_interval: StdDuration,
    retry_backoff: Duration,
    max_attempts: u32,
    shutdown: Notify,
}

impl TaskRunner {
    pub fn new(
        queue: Arc<LocalTaskQueue>,
        orchestrator: Arc<Orchestrator>,
        clock: Arc<dyn Clock>,
        poll_interval: StdDuration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            clock,
            poll_interval,
            retry_backoff,
            max_attempts: 10,
            shutdown: Notify::new(),
        }
    }

    /// Deliveries allowed per task before it is marked failed.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run until `shutdown` is called.
    ///
    /// Sleeps until the next task is due, the poll interval elapses, or a new
    /// task is queued, whichever comes first.
    pub async fn run(&self) {
        info!(poll_secs = self.poll_interval.as_secs(), "Task runner started");
        loop {
            if let Err(e) = self.process_due().await {
                warn!(error = %e, "Task runner pass failed");
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.queue.wake.notified() => {}
                _ = self.shutdown.notified() => {
                    info!("Task runner stopped");
                    return;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Deliver every task due now. Returns how many were delivered.
    pub async fn process_due(&self) -> Result<usize, meetconfirm_storage::StoreError> {
        let due = self.queue.repo.due(self.clock.now(), BATCH_SIZE)?;
        let count = due.len();
        for task in due {
            self.deliver(task).await?;
        }
        Ok(count)
    }

    async fn deliver(&self, task: ScheduledTaskRow) -> Result<(), meetconfirm_storage::StoreError> {
        let repo = &self.queue.repo;
        match self.orchestrator.run_task(task.kind, &task.meeting_id).await {
            Ok(outcome) => {
                debug!(
                    task = %task.name,
                    meeting_id = %task.meeting_id,
                    outcome = outcome.label(),
                    "Task delivered"
                );
                repo.mark_done(&task.name, self.clock.now())
            }
            Err(e) if e.is_retryable() && task.attempts + 1 < self.max_attempts => {
                let retry_at = self.clock.now() + self.retry_backoff;
                warn!(
                    task = %task.name,
                    meeting_id = %task.meeting_id,
                    attempt = task.attempts + 1,
                    %retry_at,
                    error = %e,
                    "Task failed; retrying later"
                );
                repo.reschedule(&task.name, retry_at, &e.to_string(), self.clock.now())
            }
            Err(e) => {
                warn!(
                    task = %task.name,
                    meeting_id = %task.meeting_id,
                    error = %e,
                    "Task failed permanently"
                );
                repo.mark_failed(&task.name, &e.to_string(), self.clock.now())
            }
        }
    }

    fn next_delay(&self) -> StdDuration {
        match self.queue.repo.next_run_at() {
            Ok(Some(at)) => (at - self.clock.now())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .min(self.poll_interval),
            Ok(None) => self.poll_interval,
            Err(e) => {
                warn!(error = %e, "Could not read next task time");
                self.poll_interval
            }
        }
    }
}

//! In-memory delayed-task service.
//!
//! Keeps every created task, live or delivered, so names stay reserved.
//! Tests drive delivery by draining due tasks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CreateTaskError, DelayedTaskService, TaskRequest};

#[derive(Default)]
pub struct MemoryTaskService {
    tasks: Mutex<BTreeMap<String, (TaskRequest, bool)>>,
    attempts: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryTaskService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every task ever created, ordered by name.
    pub fn tasks(&self) -> Vec<TaskRequest> {
        self.tasks
            .lock()
            .map(|t| t.values().map(|(req, _)| req.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of `create_task` calls, including collisions and failures.
    pub fn create_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Undelivered tasks due at `now`, earliest first. They are marked delivered.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<TaskRequest> {
        let Ok(mut tasks) = self.tasks.lock() else {
            return Vec::new();
        };
        let mut due: Vec<TaskRequest> = Vec::new();
        for (request, delivered) in tasks.values_mut() {
            if !*delivered && request.run_at <= now {
                *delivered = true;
                due.push(request.clone());
            }
        }
        due.sort_by_key(|r| r.run_at);
        due
    }
}

#[async_trait]
impl DelayedTaskService for MemoryTaskService {
    async fn create_task(&self, request: &TaskRequest) -> Result<(), CreateTaskError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CreateTaskError::Unavailable("marked unavailable".to_string()));
        }
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|e| CreateTaskError::Unavailable(e.to_string()))?;
        if tasks.contains_key(&request.name) {
            return Err(CreateTaskError::AlreadyExists);
        }
        tasks.insert(request.name.clone(), (request.clone(), false));
        Ok(())
    }
}

//! Append-only task event log
//!
//! Every externally observable action a task performs is recorded as a
//! `TaskEvent` in `events/<task>.jsonl`. The `seq` field, assigned under a
//! per-task file lock, is the ordering key; timestamps are informational.
//! Creation actions against the host carry the data their compensation
//! needs, so undo never has to parse free text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::Storage;
use crate::task::TaskId;

/// Closed taxonomy of logged actions. The three `Create*` variants are the
/// reversible set; the `Close*`/`Delete*` variants are their compensations
/// and are never themselves reversible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    CloneRepo,
    CreateBranch,
    CheckoutBranch,
    PushBranch,
    DeleteBranch,
    InvokeAgent,
    CreateIssue { number: u64 },
    CreatePullRequest { number: u64 },
    CreateComment { comment_id: u64 },
    CloseIssue { number: u64 },
    ClosePullRequest { number: u64 },
    DeleteComment { comment_id: u64 },
}

impl EventAction {
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            EventAction::CreateIssue { .. }
                | EventAction::CreatePullRequest { .. }
                | EventAction::CreateComment { .. }
        )
    }

    /// The compensating action, for reversible variants only
    pub fn compensation(&self) -> Option<EventAction> {
        match self {
            EventAction::CreateIssue { number } => {
                Some(EventAction::CloseIssue { number: *number })
            }
            EventAction::CreatePullRequest { number } => {
                Some(EventAction::ClosePullRequest { number: *number })
            }
            EventAction::CreateComment { comment_id } => Some(EventAction::DeleteComment {
                comment_id: *comment_id,
            }),
            _ => None,
        }
    }
}

/// One entry in a task's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub task_id: TaskId,
    /// Per-task monotonic sequence number; the ordering key
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Who performed the action ("assistant", or a user login)
    pub actor: String,
    pub action: EventAction,
    /// What the action touched (branch name, file, issue title, ...)
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Flipped false -> true by undo, once, for reversible actions only
    #[serde(default)]
    pub reversed: bool,
}

/// Identifies the task on whose behalf code is currently acting. Passed
/// explicitly wherever events are recorded; there is no process-global
/// current task.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    task_id: TaskId,
}

impl ExecutionContext {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// File-backed event log, one JSONL file per task
#[derive(Clone)]
pub struct EventLog {
    storage: Storage,
}

impl EventLog {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Exclusive lock on a task's event file. Held internally by `add`
    /// and `mark_reversed`; `undo` takes it across its whole
    /// read-compensate-mark sequence.
    pub(crate) fn task_lock(&self, task_id: TaskId) -> Result<FileLock> {
        let path = self.storage.events_file(task_id);
        FileLock::acquire(lock::lock_path_for(&path), DEFAULT_LOCK_TIMEOUT_MS)
    }

    /// Append an event. `seq` is assigned under the task's file lock, so
    /// concurrent writers never produce duplicate sequence numbers.
    pub fn add(
        &self,
        ctx: ExecutionContext,
        actor: &str,
        action: EventAction,
        target: Option<&str>,
        message: Option<&str>,
    ) -> Result<TaskEvent> {
        let _lock = self.task_lock(ctx.task_id())?;
        self.append_unlocked(ctx, actor, action, target, message)
    }

    /// Append without taking the lock; the caller must hold it.
    pub(crate) fn append_unlocked(
        &self,
        ctx: ExecutionContext,
        actor: &str,
        action: EventAction,
        target: Option<&str>,
        message: Option<&str>,
    ) -> Result<TaskEvent> {
        let path = self.storage.events_file(ctx.task_id());
        let existing: Vec<TaskEvent> = self.storage.read_jsonl(&path)?;
        let seq = existing.last().map(|e| e.seq + 1).unwrap_or(0);

        let event = TaskEvent {
            id: Uuid::new_v4(),
            task_id: ctx.task_id(),
            seq,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            target: target.map(str::to_string),
            message: message.map(str::to_string),
            reversed: false,
        };

        self.storage.append_jsonl(&path, &event)?;
        debug!(task = %ctx.task_id(), seq, action = ?event.action, "recorded event");

        Ok(event)
    }

    /// All events for a task, in sequence order
    pub fn events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>> {
        let path = self.storage.events_file(task_id);
        self.storage.read_jsonl(&path)
    }

    /// A single event by id
    pub fn event(&self, task_id: TaskId, event_id: Uuid) -> Result<TaskEvent> {
        self.events(task_id)?
            .into_iter()
            .find(|e| e.id == event_id)
            .ok_or_else(|| Error::OperationFailed(format!("no event {event_id} for task {task_id}")))
    }

    /// Flip an event's `reversed` flag. Rewrites the file atomically under
    /// the task's lock.
    pub fn mark_reversed(&self, task_id: TaskId, event_id: Uuid) -> Result<()> {
        let _lock = self.task_lock(task_id)?;
        self.mark_reversed_unlocked(task_id, event_id)
    }

    /// Flip `reversed` without taking the lock; the caller must hold it.
    pub(crate) fn mark_reversed_unlocked(&self, task_id: TaskId, event_id: Uuid) -> Result<()> {
        let path = self.storage.events_file(task_id);
        let mut events: Vec<TaskEvent> = self.storage.read_jsonl(&path)?;
        let mut found = false;
        for event in events.iter_mut() {
            if event.id == event_id {
                event.reversed = true;
                found = true;
                break;
            }
        }
        if !found {
            return Err(Error::OperationFailed(format!(
                "no event {event_id} for task {task_id}"
            )));
        }

        self.storage.rewrite_jsonl(&path, &events)
    }
}

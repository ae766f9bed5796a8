//! Task entity and lifecycle
//!
//! A task is one unit of user-requested work against a project. Its status
//! only ever moves forward: scheduled, then running, then completed or
//! failed. The store trait at the bottom lets the engine persist tasks
//! without caring whether the backing is a directory of JSON files or an
//! in-memory map.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Unique task identifier (UUID v4, assigned at creation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| Error::InvalidArgument(format!("invalid task id '{s}': {e}")))
    }
}

/// Task lifecycle states. Transitions are monotonic: a terminal state is
/// never left, and a second queue delivery of the same task bounces off
/// the guard in `can_transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Scheduled, Running) | (Scheduled, Failed) | (Running, Completed) | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the task originated. Exactly one variant per task, enforced by
/// the type: an issue number, an open pull request, or an explicit branch
/// the user wants worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskContext {
    Issue { number: u64 },
    PullRequest { number: u64, head: String, base: String },
    Branch { name: String },
}

impl TaskContext {
    /// Issue or PR number usable as a comment anchor, if any
    pub fn anchor_number(&self) -> Option<u64> {
        match self {
            TaskContext::Issue { number } => Some(*number),
            TaskContext::PullRequest { number, .. } => Some(*number),
            TaskContext::Branch { .. } => None,
        }
    }
}

/// Input to `TaskEngine::schedule`: everything known at request time.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Requesting user's login
    pub user: String,
    /// Project identifier, "owner/repo"
    pub project: String,
    /// Opaque credential handle for token exchange with the host
    pub installation: u64,
    pub context: TaskContext,
    /// Set when the request arrived as a PR review comment; the
    /// acknowledgement is posted as a reply to it when possible
    pub review_comment_id: Option<u64>,
    /// The user's free-text instruction
    pub request: String,
    /// Optional binary payload referenced by the request (e.g. an image)
    pub attachment: Option<Vec<u8>>,
    /// Model selector passed through to the agent
    pub model: String,
}

/// One unit of user-requested work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Human-readable title; empty until derived during run
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub user: String,
    pub project: String,
    pub installation: u64,
    pub context: TaskContext,
    #[serde(default)]
    pub review_comment_id: Option<u64>,
    pub request: String,
    #[serde(default)]
    pub attachment: Option<Vec<u8>>,
    /// Final response text (or internal error detail on failure)
    #[serde(default)]
    pub result: Option<String>,
    /// Id of the acknowledgement comment, edited with the outcome later
    #[serde(default)]
    pub ack_comment: Option<u64>,
    pub model: String,
}

impl Task {
    pub fn new(request: TaskRequest) -> Self {
        Self {
            id: TaskId::new(),
            title: String::new(),
            status: TaskStatus::Scheduled,
            created_at: Utc::now(),
            user: request.user,
            project: request.project,
            installation: request.installation,
            context: request.context,
            review_comment_id: request.review_comment_id,
            request: request.request,
            attachment: request.attachment,
            result: None,
            ack_comment: None,
            model: request.model,
        }
    }

    /// Move to a new status, rejecting anything non-monotonic
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Persistence port for tasks. One record per task id; `save` overwrites.
pub trait TaskStore: Send + Sync {
    fn get(&self, id: TaskId) -> Result<Task>;
    fn save(&self, task: &Task) -> Result<()>;
}

/// File-backed store: `tasks/<id>.json` under the state directory.
pub struct FileTaskStore {
    storage: Storage,
}

impl FileTaskStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl TaskStore for FileTaskStore {
    fn get(&self, id: TaskId) -> Result<Task> {
        let path = self.storage.task_file(id);
        if !path.exists() {
            return Err(Error::TaskNotFound(id));
        }
        self.storage.read_json(&path)
    }

    fn save(&self, task: &Task) -> Result<()> {
        self.storage.write_json(&self.storage.task_file(task.id), task)
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn get(&self, id: TaskId) -> Result<Task> {
        let tasks = self
            .tasks
            .read()
            .map_err(|_| Error::OperationFailed("task store lock poisoned".to_string()))?;
        tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id))
    }

    fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|_| Error::OperationFailed("task store lock poisoned".to_string()))?;
        tasks.insert(task.id, task.clone());
        Ok(())
    }
}

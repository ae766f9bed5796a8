//! Work queue and execution launchers
//!
//! Scheduling and execution are decoupled: `schedule` hands a task id to
//! an `ExecutionLauncher`, and workers pull ids off a `WorkQueue` and run
//! them end-to-end. Delivery is at-least-once; a duplicate pop bounces off
//! `run`'s status guard, so no dedup happens here.

use std::collections::VecDeque;
use std::process::Command;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::engine::TaskEngine;
use crate::error::{Error, Result};
use crate::task::TaskId;

/// Queue of task ids awaiting execution
pub trait WorkQueue: Send + Sync {
    fn push(&self, task_id: TaskId) -> Result<()>;

    /// Block until an id is available. `None` means the queue was closed
    /// and drained; workers exit.
    fn pop(&self) -> Option<TaskId>;

    /// Stop accepting pushes and wake all blocked workers once the
    /// backlog drains
    fn close(&self);
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<TaskId>,
    closed: bool,
}

/// In-process queue: a mutexed deque with a condvar for blocking pops
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for InMemoryQueue {
    fn push(&self, task_id: TaskId) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::OperationFailed("work queue lock poisoned".to_string()))?;
        if state.closed {
            return Err(Error::OperationFailed(
                "work queue is closed".to_string(),
            ));
        }
        state.items.push_back(task_id);
        self.available.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<TaskId> {
        let mut state = self.state.lock().ok()?;
        loop {
            if let Some(id) = state.items.pop_front() {
                return Some(id);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).ok()?;
        }
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.available.notify_all();
    }
}

/// Consumes the work queue and executes tasks, one at a time per worker
pub struct Dispatcher {
    engine: Arc<TaskEngine>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(engine: Arc<TaskEngine>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { engine, queue }
    }

    /// Consumer loop: runs until the queue closes. Task failures are
    /// absorbed by `run`; only load errors and duplicate deliveries
    /// surface here, and neither stops the loop.
    pub fn run(&self) {
        info!("dispatcher worker started");
        while let Some(task_id) = self.queue.pop() {
            match self.engine.run(task_id) {
                Ok(task) => {
                    debug!(task = %task_id, status = %task.status, "task processed");
                }
                Err(err) => {
                    warn!(task = %task_id, %err, "dropped queue delivery");
                }
            }
        }
        info!("dispatcher worker stopped");
    }

    /// Spawn `count` worker threads sharing this dispatcher
    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|_| {
                let dispatcher = Arc::clone(self);
                thread::spawn(move || dispatcher.run())
            })
            .collect()
    }
}

/// Hands a freshly scheduled task id to whatever executes it
pub trait ExecutionLauncher: Send + Sync {
    fn launch(&self, task_id: TaskId) -> Result<()>;
}

/// Launch by enqueueing for in-process workers
pub struct QueueLauncher {
    queue: Arc<dyn WorkQueue>,
}

impl QueueLauncher {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

impl ExecutionLauncher for QueueLauncher {
    fn launch(&self, task_id: TaskId) -> Result<()> {
        self.queue.push(task_id)
    }
}

/// Launch by spawning an external command with the task id appended, for
/// container or job-runner setups where execution happens out of process
pub struct JobLauncher {
    program: String,
    args: Vec<String>,
}

impl JobLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl ExecutionLauncher for JobLauncher {
    fn launch(&self, task_id: TaskId) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(task_id.to_string())
            .spawn()?;
        info!(task = %task_id, pid = child.id(), program = %self.program, "launched job");
        Ok(())
    }
}

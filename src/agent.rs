//! Agent executor interface
//!
//! The reasoning loop itself lives in the embedding application. From the
//! engine's perspective an agent run is one opaque, eventually-terminating
//! call that reads and edits files in the task's workspace and reports the
//! cost it accrued.

use std::path::PathBuf;

use crate::budget::CostItem;
use crate::error::Result;
use crate::task::TaskId;

/// Everything the agent needs to act on a task
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub task_id: TaskId,
    /// The user's free-text instruction
    pub request: String,
    /// Checked-out working copy the agent operates in
    pub workspace: PathBuf,
    /// "owner/repo"
    pub project: String,
    /// Branch the workspace has active
    pub branch: String,
    pub model: String,
    /// Optional binary payload referenced by the request
    pub attachment: Option<Vec<u8>>,
    /// Pass-through tool limits from config
    pub max_steps: u32,
    pub max_file_size: u64,
    pub max_file_lines: u32,
}

/// Result of one agent run
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The agent's final response text, shown to the requesting user
    pub output: String,
    /// Cost accrued during the run, billed in the finally phase
    pub cost_items: Vec<CostItem>,
}

/// Suggested metadata for a pull request opened on the agent's behalf
#[derive(Debug, Clone)]
pub struct PrSuggestion {
    pub title: String,
    pub labels: Vec<String>,
}

/// The autonomous coding agent, as the engine sees it.
pub trait AgentExecutor: Send + Sync {
    /// Run the agent against the workspace. Must terminate; an error
    /// fails the task.
    fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentOutcome>;

    /// Suggest a title and labels for a pull request covering the changes
    /// just made. `None` means the caller falls back to the task title.
    fn suggest_pull_request(&self, _invocation: &AgentInvocation) -> Option<PrSuggestion> {
        None
    }
}

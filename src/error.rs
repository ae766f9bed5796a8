//! Error types for pilot
//!
//! The taxonomy follows how failures surface to the requesting user:
//! - Permission and budget errors are terminal and get a specific comment
//! - Branch-invariant and agent errors fail the task with a generic comment
//! - Host "not found" errors are locally recovered where a fallback exists
//! - Everything else is plumbing (git, io, serialization, locks)

use std::path::PathBuf;
use thiserror::Error;

use crate::host::HostError;
use crate::task::{TaskId, TaskStatus};

/// Main error type for pilot operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("User {user} lacks write permission on {project}")]
    PermissionDenied { user: String, project: String },

    #[error("Budget exhausted for {user}: balance is {balance} credits")]
    BudgetExhausted { user: String, balance: String },

    #[error("Active branch '{branch}' is the default branch; refusing to run agent")]
    BranchInvariant { branch: String },

    #[error("Agent execution failed: {0}")]
    Agent(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("VCS host error: {0}")]
    Host(#[from] HostError),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Whether this failure should show its message verbatim in the public
    /// reply. Internal detail (git plumbing, agent stack traces) must not
    /// be echoed into host comments.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied { .. } | Error::BudgetExhausted { .. }
        )
    }
}

/// Result type alias for pilot operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_and_budget_errors_are_user_facing() {
        let err = Error::PermissionDenied {
            user: "octocat".to_string(),
            project: "octo/repo".to_string(),
        };
        assert!(err.is_user_facing());

        let err = Error::BudgetExhausted {
            user: "octocat".to_string(),
            balance: "-1.50".to_string(),
        };
        assert!(err.is_user_facing());
    }

    #[test]
    fn internal_errors_are_not_user_facing() {
        let err = Error::BranchInvariant {
            branch: "main".to_string(),
        };
        assert!(!err.is_user_facing());

        let err = Error::Agent("boom".to_string());
        assert!(!err.is_user_facing());
    }
}

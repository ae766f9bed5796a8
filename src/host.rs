//! VCS host interface
//!
//! Everything the engine needs from a git hosting provider, expressed as a
//! trait the embedding application implements (and tests mock). The engine
//! never talks HTTP itself; it only sees these calls and the wire types
//! below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures surfaced by a `VcsHost` implementation
#[derive(Error, Debug)]
pub enum HostError {
    /// The addressed resource does not exist (or is invisible to the
    /// credential). Recovered locally where a fallback exists, e.g. the
    /// review-reply to plain-comment downgrade.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transport or provider-side failure; not recoverable by the engine
    #[error("host transport error: {0}")]
    Transport(String),
}

/// Collaborator permission levels, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    None,
    Read,
    Triage,
    Write,
    Maintain,
    Admin,
}

impl Permission {
    /// Whether this level allows scheduling tasks against the project
    pub fn can_write(self) -> bool {
        self >= Permission::Write
    }
}

/// Repository metadata needed to provision a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// "owner/repo"
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
}

/// Handle to a comment the engine created or replies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub id: u64,
}

/// A pull request as the engine sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub head: String,
    pub base: String,
    pub html_url: String,
}

/// Git hosting provider operations used by the engine.
///
/// Implementations are expected to be cheap to share across worker threads.
pub trait VcsHost: Send + Sync {
    /// Look up repository metadata for "owner/repo"
    fn repository(&self, project: &str) -> Result<RepositoryInfo, HostError>;

    /// The collaborator permission `user` holds on `project`
    fn collaborator_permission(&self, project: &str, user: &str) -> Result<Permission, HostError>;

    /// Post a comment on an issue or pull request
    fn create_comment(
        &self,
        project: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentRef, HostError>;

    /// Replace the body of an existing comment
    fn edit_comment(&self, project: &str, comment_id: u64, body: &str) -> Result<(), HostError>;

    /// Reply in-thread to a PR review comment. `NotFound` means the thread
    /// is gone and callers should fall back to `create_comment`.
    fn create_review_reply(
        &self,
        project: &str,
        pr_number: u64,
        review_comment_id: u64,
        body: &str,
    ) -> Result<CommentRef, HostError>;

    /// Open a pull request from `head` into `base`
    fn create_pull_request(
        &self,
        project: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        labels: &[String],
    ) -> Result<PullRequestInfo, HostError>;

    fn pull_request(&self, project: &str, number: u64) -> Result<PullRequestInfo, HostError>;

    /// Names of remote branches, for collision checks
    fn branches(&self, project: &str) -> Result<Vec<String>, HostError>;

    // Compensating actions for undo
    fn close_issue(&self, project: &str, number: u64) -> Result<(), HostError>;
    fn close_pull_request(&self, project: &str, number: u64) -> Result<(), HostError>;
    fn delete_comment(&self, project: &str, comment_id: u64) -> Result<(), HostError>;

    /// Exchange an installation handle for a short-lived access token used
    /// in authenticated clone/push URLs
    fn installation_token(&self, installation: u64) -> Result<String, HostError>;
}

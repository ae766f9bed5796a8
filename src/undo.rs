//! Selective undo of reversible events
//!
//! Undo never rewrites history: it performs the compensating action on the
//! host, appends the compensation as a new event, and flips the original
//! entry's `reversed` flag. Calling it twice on the same entry is a no-op
//! the second time.

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventAction, EventLog, ExecutionContext};
use crate::host::VcsHost;
use crate::task::TaskId;

/// What an undo call actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Compensation performed and recorded
    Reversed,
    /// The entry was already reversed; no host call was made
    AlreadyReversed,
}

/// Undo a single reversible event.
///
/// Idempotent at the entry level: a second call for the same event returns
/// `AlreadyReversed` without touching the host. Non-reversible actions are
/// rejected. The task's event-file lock is held from the `reversed` check
/// through the flag flip, so concurrent calls for the same entry serialize
/// and only one performs the compensation.
pub fn undo_event(
    log: &EventLog,
    host: &dyn VcsHost,
    project: &str,
    task_id: TaskId,
    event_id: Uuid,
) -> Result<UndoOutcome> {
    let _lock = log.task_lock(task_id)?;
    let event = log.event(task_id, event_id)?;

    if event.reversed {
        return Ok(UndoOutcome::AlreadyReversed);
    }

    let compensation = event.action.compensation().ok_or_else(|| {
        Error::InvalidArgument(format!("event {event_id} is not reversible"))
    })?;

    match compensation {
        EventAction::CloseIssue { number } => host.close_issue(project, number)?,
        EventAction::ClosePullRequest { number } => host.close_pull_request(project, number)?,
        EventAction::DeleteComment { comment_id } => host.delete_comment(project, comment_id)?,
        // compensation() only yields the three variants above
        _ => return Err(Error::InvalidArgument(format!("event {event_id} is not reversible"))),
    }

    let ctx = ExecutionContext::new(task_id);
    log.append_unlocked(
        ctx,
        "assistant",
        compensation,
        event.target.as_deref(),
        Some(&format!("undo of event {}", event.seq)),
    )?;
    log.mark_reversed_unlocked(task_id, event_id)?;

    info!(task = %task_id, event = %event_id, "reversed event");
    Ok(UndoOutcome::Reversed)
}

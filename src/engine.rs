//! Task state machine
//!
//! `schedule` is the synchronous front door: it gates on collaborator
//! permission, persists the task, posts exactly one acknowledgement
//! comment, and hands the id to a launcher. `run` executes a scheduled
//! task end-to-end on a worker and always finishes with the same finally
//! phase: persist status and result, write the bill, debit the ledger,
//! and edit the acknowledgement comment with the outcome.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::agent::{AgentExecutor, AgentInvocation, AgentOutcome};
use crate::branchname::unique_branch_name;
use crate::budget::{compute_bill, write_bill, BudgetLedger, CostItem, Credits, DiscountPolicy};
use crate::cache::RepositoryCache;
use crate::config::Config;
use crate::dispatcher::ExecutionLauncher;
use crate::error::{Error, Result};
use crate::events::{EventAction, EventLog, ExecutionContext};
use crate::host::{HostError, VcsHost};
use crate::storage::Storage;
use crate::task::{Task, TaskContext, TaskId, TaskRequest, TaskStatus, TaskStore};
use crate::workspace::{authenticated_url, Workspace};

/// Actor name the engine records events and comments under
const ENGINE_ACTOR: &str = "assistant";

const TITLE_MAX_CHARS: usize = 100;

pub struct TaskEngine {
    config: Config,
    storage: Storage,
    store: Arc<dyn TaskStore>,
    events: EventLog,
    ledger: Arc<dyn BudgetLedger>,
    host: Arc<dyn VcsHost>,
    agent: Arc<dyn AgentExecutor>,
    cache: RepositoryCache,
    discount: Arc<dyn DiscountPolicy>,
}

impl TaskEngine {
    pub fn new(
        config: Config,
        storage: Storage,
        store: Arc<dyn TaskStore>,
        ledger: Arc<dyn BudgetLedger>,
        host: Arc<dyn VcsHost>,
        agent: Arc<dyn AgentExecutor>,
        discount: Arc<dyn DiscountPolicy>,
    ) -> Self {
        let events = EventLog::new(storage.clone());
        let cache = RepositoryCache::new(storage.clone());
        Self {
            config,
            storage,
            store,
            events,
            ledger,
            host,
            agent,
            cache,
            discount,
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Accept a task request: check permission, persist, acknowledge,
    /// launch. The permission gate runs before anything is enqueued, so a
    /// denied request never reaches a worker.
    pub fn schedule(&self, request: TaskRequest, launcher: &dyn ExecutionLauncher) -> Result<Task> {
        let permission = self
            .host
            .collaborator_permission(&request.project, &request.user)?;

        let mut task = Task::new(request);
        let ctx = ExecutionContext::new(task.id);

        if !permission.can_write() {
            warn!(user = %task.user, project = %task.project, "permission denied");
            let denied = Error::PermissionDenied {
                user: task.user.clone(),
                project: task.project.clone(),
            };
            task.status = TaskStatus::Failed;
            task.result = Some(denied.to_string());
            self.store.save(&task)?;
            self.post_reply(&task, ctx, &self.public_message(&task, Err(&denied)))?;
            return Ok(task);
        }

        self.store.save(&task)?;

        let body = format!(
            "On it! You can follow progress here: {}.",
            self.dashboard_link(task.id)
        );
        if let Some(comment) = self.post_reply(&task, ctx, &body)? {
            task.ack_comment = Some(comment);
            self.store.save(&task)?;
        }

        launcher.launch(task.id)?;
        info!(task = %task.id, project = %task.project, "scheduled task");
        Ok(task)
    }

    /// Execute a scheduled task. Errors escape only for load failures and
    /// duplicate delivery; execution failures are absorbed into a failed
    /// task, and the finally phase runs regardless.
    pub fn run(&self, task_id: TaskId) -> Result<Task> {
        let mut task = self.store.get(task_id)?;
        task.transition(TaskStatus::Running)?;
        self.store.save(&task)?;
        info!(task = %task_id, project = %task.project, "running task");

        let mut cost_items = Vec::new();
        let outcome = self.execute(&mut task, &mut cost_items);

        self.finish(&mut task, outcome, &cost_items);
        Ok(task)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&self, task: &mut Task, cost_items: &mut Vec<CostItem>) -> Result<String> {
        let ctx = ExecutionContext::new(task.id);

        // Budget gate, before any workspace work
        let starting = Credits::whole(self.config.billing.starting_balance);
        let balance = self.ledger.get_or_create(&task.user, starting)?;
        if balance.is_negative() {
            return Err(Error::BudgetExhausted {
                user: task.user.clone(),
                balance: balance.to_string(),
            });
        }

        if task.title.is_empty() {
            task.title = derive_title(&task.request);
        }

        let repo = self.host.repository(&task.project)?;
        let token = self.host.installation_token(task.installation)?;
        let remote_url = authenticated_url(&repo.clone_url, &token);

        let workspace = Workspace::provision(
            &self.cache,
            &self.storage.workspace_dir(task.id),
            &task.project,
            &remote_url,
            &repo.default_branch,
        )?;
        self.events.add(
            ctx,
            ENGINE_ACTOR,
            EventAction::CloneRepo,
            Some(&task.project),
            None,
        )?;

        // Branch mode priority: PR head, then explicit branch, then a
        // fresh branch off the default
        let mut created_branch: Option<String> = None;
        let branch = match &task.context {
            TaskContext::PullRequest { head, .. } => {
                workspace.checkout_branch(head)?;
                self.events.add(
                    ctx,
                    ENGINE_ACTOR,
                    EventAction::CheckoutBranch,
                    Some(head),
                    None,
                )?;
                head.clone()
            }
            TaskContext::Branch { name } => {
                workspace.fetch_remote()?;
                workspace.checkout_branch(name)?;
                self.events.add(
                    ctx,
                    ENGINE_ACTOR,
                    EventAction::CheckoutBranch,
                    Some(name),
                    None,
                )?;
                name.clone()
            }
            TaskContext::Issue { .. } => {
                let mut existing: HashSet<String> = workspace.branch_names()?;
                existing.extend(self.host.branches(&task.project)?);
                let name = unique_branch_name(
                    &task.title,
                    &self.config.branches.prefix,
                    self.config.branches.max_name_length,
                    &existing,
                );
                workspace.create_branch(&name)?;
                self.events.add(
                    ctx,
                    ENGINE_ACTOR,
                    EventAction::CreateBranch,
                    Some(&name),
                    None,
                )?;
                created_branch = Some(name.clone());
                name
            }
        };

        // The agent must never run on the default branch
        let active = workspace.active_branch()?;
        if active == repo.default_branch {
            return Err(Error::BranchInvariant { branch: active });
        }

        let invocation = AgentInvocation {
            task_id: task.id,
            request: task.request.clone(),
            workspace: workspace.path().to_path_buf(),
            project: task.project.clone(),
            branch: branch.clone(),
            model: task.model.clone(),
            attachment: task.attachment.clone(),
            max_steps: self.config.agent.max_steps,
            max_file_size: self.config.agent.max_file_size,
            max_file_lines: self.config.agent.max_file_lines,
        };

        self.events
            .add(ctx, ENGINE_ACTOR, EventAction::InvokeAgent, None, None)?;
        let AgentOutcome { output, cost_items: accrued } = self.agent.invoke(&invocation)?;
        cost_items.extend(accrued);

        let mut response = output;

        if workspace.has_uncommitted_changes()? {
            workspace.commit_all(&task.title)?;
        }

        if workspace.diff_against_default()? > 0 {
            workspace.push(&branch)?;
            self.events.add(
                ctx,
                ENGINE_ACTOR,
                EventAction::PushBranch,
                Some(&branch),
                None,
            )?;

            if created_branch.is_some() {
                let pr = self.open_pull_request(task, &invocation, &branch, &repo.default_branch)?;
                self.events.add(
                    ctx,
                    ENGINE_ACTOR,
                    EventAction::CreatePullRequest { number: pr.number },
                    Some(&pr.title),
                    None,
                )?;
                response.push_str(&format!(
                    "\n\nI opened pull request [#{}]({}) with the changes.",
                    pr.number, pr.html_url
                ));
            }
        } else if let Some(name) = created_branch {
            // Nothing the default branch does not already have
            workspace.delete_branch(&name)?;
            self.events.add(
                ctx,
                ENGINE_ACTOR,
                EventAction::DeleteBranch,
                Some(&name),
                None,
            )?;
        }

        let dashboard = self.dashboard_link(task.id);
        response.push_str(&format!(
            "\n\n---\nTask log: {dashboard} | Undo: {dashboard}/undo"
        ));
        Ok(response)
    }

    fn open_pull_request(
        &self,
        task: &Task,
        invocation: &AgentInvocation,
        head: &str,
        base: &str,
    ) -> Result<crate::host::PullRequestInfo> {
        let suggestion = self.agent.suggest_pull_request(invocation);
        let (title, labels) = match suggestion {
            Some(s) => (s.title, s.labels),
            None => (task.title.clone(), Vec::new()),
        };

        let body = format!(
            "{}\n\n---\nTask log: {}",
            task.request,
            self.dashboard_link(task.id)
        );
        let pr = self
            .host
            .create_pull_request(&task.project, &title, &body, head, base, &labels)?;
        info!(task = %task.id, pr = pr.number, "opened pull request");
        Ok(pr)
    }

    // =========================================================================
    // Finally phase
    // =========================================================================

    /// Persist the terminal state, bill, debit, and edit the
    /// acknowledgement. Failures here are logged and swallowed so one
    /// broken step never skips the rest.
    fn finish(&self, task: &mut Task, outcome: Result<String>, cost_items: &[CostItem]) {
        let public = self.public_message(task, outcome.as_ref().map(|s| s.as_str()));

        match &outcome {
            Ok(response) => {
                task.result = Some(response.clone());
                task.status = TaskStatus::Completed;
            }
            Err(err) => {
                error!(task = %task.id, %err, "task failed");
                task.result = Some(err.to_string());
                task.status = TaskStatus::Failed;
            }
        }

        let bill = compute_bill(
            task.id,
            cost_items,
            self.discount.discount_pct(&task.project),
            self.config.billing.credits_per_usd,
        );
        if let Err(err) = write_bill(&self.storage, &bill) {
            warn!(task = %task.id, %err, "failed to persist bill");
        }
        if let Err(err) = self.ledger.debit(&task.user, bill.final_cost) {
            warn!(task = %task.id, %err, "failed to debit ledger");
        }

        if let Some(comment_id) = task.ack_comment {
            if let Err(err) = self.host.edit_comment(&task.project, comment_id, &public) {
                warn!(task = %task.id, %err, "failed to edit acknowledgement comment");
            }
        }

        if let Err(err) = self.store.save(task) {
            error!(task = %task.id, %err, "failed to persist task");
        }
        info!(task = %task.id, status = %task.status, cost = %bill.final_cost, "task finished");
    }

    // =========================================================================
    // Host replies
    // =========================================================================

    /// Post exactly one reply at the task's origin. Review-comment origins
    /// try an in-thread reply first and fall back to a plain comment when
    /// the thread is gone. Branch-context tasks have nowhere to comment.
    fn post_reply(
        &self,
        task: &Task,
        ctx: ExecutionContext,
        body: &str,
    ) -> Result<Option<u64>> {
        let Some(anchor) = task.context.anchor_number() else {
            return Ok(None);
        };

        let comment = match (task.review_comment_id, &task.context) {
            (Some(review_id), TaskContext::PullRequest { number, .. }) => {
                match self
                    .host
                    .create_review_reply(&task.project, *number, review_id, body)
                {
                    Ok(comment) => comment,
                    Err(HostError::NotFound(_)) => {
                        self.host.create_comment(&task.project, anchor, body)?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            _ => self.host.create_comment(&task.project, anchor, body)?,
        };

        self.events.add(
            ctx,
            ENGINE_ACTOR,
            EventAction::CreateComment {
                comment_id: comment.id,
            },
            None,
            Some(body),
        )?;
        Ok(Some(comment.id))
    }

    /// Map an outcome to the text shown on the host. Internal errors are
    /// never echoed; users get a pointer to the task log instead.
    fn public_message(&self, task: &Task, outcome: std::result::Result<&str, &Error>) -> String {
        match outcome {
            Ok(response) => response.to_string(),
            Err(err) if err.is_user_facing() => err.to_string(),
            Err(_) => format!(
                "Sorry, something went wrong while working on this task. \
                 You can find details here: {}.",
                self.dashboard_link(task.id)
            ),
        }
    }

    fn dashboard_link(&self, task_id: TaskId) -> String {
        format!("{}/{}", self.config.dashboard_base_url, task_id)
    }
}

/// Derive a task title from the first line of the request, clipped to a
/// sane length
fn derive_title(request: &str) -> String {
    let first_line = request.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let clipped: String = first_line.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{}...", clipped.trim_end())
}

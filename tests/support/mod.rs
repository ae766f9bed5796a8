#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use git2::{BranchType, IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

use pilot::agent::{AgentExecutor, AgentInvocation, AgentOutcome, PrSuggestion};
use pilot::budget::{CostItem, DiscountPolicy, InMemoryLedger, NoDiscount, Usd};
use pilot::config::Config;
use pilot::dispatcher::ExecutionLauncher;
use pilot::engine::TaskEngine;
use pilot::host::{
    CommentRef, HostError, Permission, PullRequestInfo, RepositoryInfo, VcsHost,
};
use pilot::storage::Storage;
use pilot::task::{InMemoryTaskStore, TaskContext, TaskId, TaskRequest, TaskStore};
use pilot::{Error, Result};

/// Route engine logs through the test writer; `RUST_LOG` controls
/// verbosity. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Local origin repository
// =============================================================================

/// A bare repository standing in for the hosted remote, plus a setup
/// clone used to push fixture branches.
pub struct TestOrigin {
    pub bare_path: PathBuf,
    pub work_path: PathBuf,
    pub default_branch: String,
}

impl TestOrigin {
    pub fn create(dir: &Path) -> Self {
        let work_path = dir.join("origin-work");
        let work = Repository::init(&work_path).expect("init work repo");
        std::fs::write(work_path.join("README.md"), "hello\n").expect("write readme");

        let mut index = work.index().expect("index");
        index.add_path(Path::new("README.md")).expect("add");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");

        let default_branch = {
            let tree = work.find_tree(tree_id).expect("tree");
            let sig = test_signature();
            work.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .expect("commit");
            work.head().expect("head").shorthand().expect("name").to_string()
        };

        let bare_path = dir.join("origin.git");
        let bare = git2::build::RepoBuilder::new()
            .bare(true)
            .clone(work_path.to_str().expect("utf8"), &bare_path)
            .expect("bare clone");
        bare.set_head(&format!("refs/heads/{default_branch}"))
            .expect("set head");

        work.remote("origin", bare_path.to_str().expect("utf8"))
            .expect("add remote");

        Self {
            bare_path,
            work_path,
            default_branch,
        }
    }

    pub fn url(&self) -> String {
        self.bare_path.to_string_lossy().into_owned()
    }

    /// Push a branch with one extra commit touching `file`
    pub fn push_branch(&self, name: &str, file: &str, contents: &str) {
        let work = Repository::open(&self.work_path).expect("open work repo");
        let head = work.head().expect("head").peel_to_commit().expect("commit");
        work.branch(name, &head, false).expect("branch");
        work.set_head(&format!("refs/heads/{name}")).expect("set head");
        work.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .expect("checkout");

        std::fs::write(self.work_path.join(file), contents).expect("write file");
        let mut index = work.index().expect("index");
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .expect("add all");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = work.find_tree(tree_id).expect("tree");
        let sig = test_signature();
        work.commit(Some("HEAD"), &sig, &sig, &format!("add {file}"), &tree, &[&head])
            .expect("commit");

        let mut remote = work.find_remote("origin").expect("remote");
        remote
            .push(&[format!("refs/heads/{name}:refs/heads/{name}")], None)
            .expect("push");

        // Back to the default branch for the next fixture
        work.set_head(&format!("refs/heads/{}", self.default_branch))
            .expect("set head");
        work.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .expect("checkout");
    }

    pub fn has_branch(&self, name: &str) -> bool {
        let bare = Repository::open_bare(&self.bare_path).expect("open bare");
        let found = bare.find_branch(name, BranchType::Local);
        found.is_ok()
    }

    pub fn branch_tip(&self, name: &str) -> Option<Oid> {
        let bare = Repository::open_bare(&self.bare_path).expect("open bare");
        bare.find_branch(name, BranchType::Local)
            .ok()
            .and_then(|b| b.get().target())
    }
}

fn test_signature() -> Signature<'static> {
    Signature::now("pilot-test", "pilot-test@example.com").expect("signature")
}

// =============================================================================
// Mock VCS host
// =============================================================================

#[derive(Debug, Clone)]
pub struct RecordedComment {
    pub id: u64,
    pub issue_number: u64,
    pub body: String,
}

/// Records every call; behavior is adjusted through public fields.
pub struct MockHost {
    pub repo_info: Mutex<RepositoryInfo>,
    pub permissions: Mutex<HashMap<String, Permission>>,
    pub remote_branches: Mutex<Vec<String>>,
    /// When set, review replies fail with NotFound to exercise the
    /// plain-comment fallback
    pub review_thread_missing: AtomicBool,

    next_id: AtomicU64,
    pub comments: Mutex<Vec<RecordedComment>>,
    pub review_replies: Mutex<Vec<RecordedComment>>,
    pub edits: Mutex<Vec<(u64, String)>>,
    pub pull_requests: Mutex<Vec<PullRequestInfo>>,
    pub closed_issues: Mutex<Vec<u64>>,
    pub closed_pull_requests: Mutex<Vec<u64>>,
    pub deleted_comments: Mutex<Vec<u64>>,
}

impl MockHost {
    pub fn new(origin: &TestOrigin) -> Self {
        Self {
            repo_info: Mutex::new(RepositoryInfo {
                full_name: "octo/repo".to_string(),
                clone_url: origin.url(),
                default_branch: origin.default_branch.clone(),
            }),
            permissions: Mutex::new(HashMap::new()),
            remote_branches: Mutex::new(Vec::new()),
            review_thread_missing: AtomicBool::new(false),
            next_id: AtomicU64::new(100),
            comments: Mutex::new(Vec::new()),
            review_replies: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            pull_requests: Mutex::new(Vec::new()),
            closed_issues: Mutex::new(Vec::new()),
            closed_pull_requests: Mutex::new(Vec::new()),
            deleted_comments: Mutex::new(Vec::new()),
        }
    }

    pub fn grant(&self, user: &str, permission: Permission) {
        self.permissions
            .lock()
            .unwrap()
            .insert(user.to_string(), permission);
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn last_edit(&self) -> Option<(u64, String)> {
        self.edits.lock().unwrap().last().cloned()
    }
}

impl VcsHost for MockHost {
    fn repository(&self, _project: &str) -> std::result::Result<RepositoryInfo, HostError> {
        Ok(self.repo_info.lock().unwrap().clone())
    }

    fn collaborator_permission(
        &self,
        _project: &str,
        user: &str,
    ) -> std::result::Result<Permission, HostError> {
        Ok(*self
            .permissions
            .lock()
            .unwrap()
            .get(user)
            .unwrap_or(&Permission::None))
    }

    fn create_comment(
        &self,
        _project: &str,
        issue_number: u64,
        body: &str,
    ) -> std::result::Result<CommentRef, HostError> {
        let id = self.next();
        self.comments.lock().unwrap().push(RecordedComment {
            id,
            issue_number,
            body: body.to_string(),
        });
        Ok(CommentRef { id })
    }

    fn edit_comment(
        &self,
        _project: &str,
        comment_id: u64,
        body: &str,
    ) -> std::result::Result<(), HostError> {
        self.edits.lock().unwrap().push((comment_id, body.to_string()));
        Ok(())
    }

    fn create_review_reply(
        &self,
        _project: &str,
        pr_number: u64,
        review_comment_id: u64,
        body: &str,
    ) -> std::result::Result<CommentRef, HostError> {
        if self.review_thread_missing.load(Ordering::SeqCst) {
            return Err(HostError::NotFound(format!(
                "review comment {review_comment_id}"
            )));
        }
        let id = self.next();
        self.review_replies.lock().unwrap().push(RecordedComment {
            id,
            issue_number: pr_number,
            body: body.to_string(),
        });
        Ok(CommentRef { id })
    }

    fn create_pull_request(
        &self,
        _project: &str,
        title: &str,
        _body: &str,
        head: &str,
        base: &str,
        _labels: &[String],
    ) -> std::result::Result<PullRequestInfo, HostError> {
        let number = self.next();
        let pr = PullRequestInfo {
            number,
            title: title.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            html_url: format!("https://example.test/octo/repo/pull/{number}"),
        };
        self.pull_requests.lock().unwrap().push(pr.clone());
        Ok(pr)
    }

    fn pull_request(
        &self,
        _project: &str,
        number: u64,
    ) -> std::result::Result<PullRequestInfo, HostError> {
        self.pull_requests
            .lock()
            .unwrap()
            .iter()
            .find(|pr| pr.number == number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("pull request {number}")))
    }

    fn branches(&self, _project: &str) -> std::result::Result<Vec<String>, HostError> {
        Ok(self.remote_branches.lock().unwrap().clone())
    }

    fn close_issue(&self, _project: &str, number: u64) -> std::result::Result<(), HostError> {
        self.closed_issues.lock().unwrap().push(number);
        Ok(())
    }

    fn close_pull_request(
        &self,
        _project: &str,
        number: u64,
    ) -> std::result::Result<(), HostError> {
        self.closed_pull_requests.lock().unwrap().push(number);
        Ok(())
    }

    fn delete_comment(&self, _project: &str, comment_id: u64) -> std::result::Result<(), HostError> {
        self.deleted_comments.lock().unwrap().push(comment_id);
        Ok(())
    }

    fn installation_token(&self, installation: u64) -> std::result::Result<String, HostError> {
        Ok(format!("test-token-{installation}"))
    }
}

// =============================================================================
// Scripted agent
// =============================================================================

pub enum AgentScript {
    /// Write these (relative path, contents) pairs into the workspace
    EditFiles(Vec<(String, String)>),
    /// Touch nothing
    NoOp,
    /// Fail with this message
    Fail(String),
}

pub struct ScriptedAgent {
    pub script: AgentScript,
    pub cost_items: Vec<CostItem>,
    pub suggestion: Option<PrSuggestion>,
    pub invocations: Mutex<Vec<AgentInvocation>>,
}

impl ScriptedAgent {
    pub fn new(script: AgentScript) -> Self {
        Self {
            script,
            cost_items: Vec::new(),
            suggestion: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cost(mut self, title: &str, micros: i64) -> Self {
        self.cost_items.push(CostItem {
            title: title.to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 1000,
            completion_tokens: 200,
            requests: 1,
            cost: Usd::from_micros(micros),
        });
        self
    }

    pub fn with_suggestion(mut self, title: &str, labels: &[&str]) -> Self {
        self.suggestion = Some(PrSuggestion {
            title: title.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        self
    }
}

impl AgentExecutor for ScriptedAgent {
    fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentOutcome> {
        self.invocations.lock().unwrap().push(invocation.clone());

        match &self.script {
            AgentScript::EditFiles(files) => {
                for (rel_path, contents) in files {
                    let path = invocation.workspace.join(rel_path);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, contents)?;
                }
                Ok(AgentOutcome {
                    output: "Done, the requested changes are in place.".to_string(),
                    cost_items: self.cost_items.clone(),
                })
            }
            AgentScript::NoOp => Ok(AgentOutcome {
                output: "Everything already looks correct, nothing to change.".to_string(),
                cost_items: self.cost_items.clone(),
            }),
            AgentScript::Fail(message) => Err(Error::Agent(message.clone())),
        }
    }

    fn suggest_pull_request(&self, _invocation: &AgentInvocation) -> Option<PrSuggestion> {
        self.suggestion.clone()
    }
}

// =============================================================================
// Launcher and harness
// =============================================================================

/// Launcher that just records the ids it was handed
#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<TaskId>>,
}

impl ExecutionLauncher for RecordingLauncher {
    fn launch(&self, task_id: TaskId) -> Result<()> {
        self.launched.lock().unwrap().push(task_id);
        Ok(())
    }
}

/// Full engine wired against a local origin, a mock host, and a scripted
/// agent. Dropping the harness removes all state.
pub struct Harness {
    pub temp: TempDir,
    pub origin: TestOrigin,
    pub storage: Storage,
    pub store: Arc<InMemoryTaskStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub host: Arc<MockHost>,
    pub agent: Arc<ScriptedAgent>,
    pub engine: Arc<TaskEngine>,
}

impl Harness {
    pub fn new(agent: ScriptedAgent) -> Self {
        Self::with_discount(agent, Arc::new(NoDiscount))
    }

    pub fn with_discount(agent: ScriptedAgent, discount: Arc<dyn DiscountPolicy>) -> Self {
        init_tracing();
        let temp = TempDir::new().expect("tempdir");
        let origin = TestOrigin::create(temp.path());

        let storage = Storage::new(temp.path().join("state"));
        storage.init().expect("init storage");

        let store = Arc::new(InMemoryTaskStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let host = Arc::new(MockHost::new(&origin));
        host.grant("octocat", Permission::Write);
        let agent = Arc::new(agent);

        let engine = Arc::new(TaskEngine::new(
            Config::default(),
            storage.clone(),
            store.clone() as Arc<dyn TaskStore>,
            ledger.clone(),
            host.clone(),
            agent.clone(),
            discount,
        ));

        Self {
            temp,
            origin,
            storage,
            store,
            ledger,
            host,
            agent,
            engine,
        }
    }

    pub fn issue_request(&self, request: &str) -> TaskRequest {
        TaskRequest {
            user: "octocat".to_string(),
            project: "octo/repo".to_string(),
            installation: 7,
            context: TaskContext::Issue { number: 12 },
            review_comment_id: None,
            request: request.to_string(),
            attachment: None,
            model: "gpt-4".to_string(),
        }
    }

    pub fn pr_request(&self, number: u64, head: &str, request: &str) -> TaskRequest {
        TaskRequest {
            user: "octocat".to_string(),
            project: "octo/repo".to_string(),
            installation: 7,
            context: TaskContext::PullRequest {
                number,
                head: head.to_string(),
                base: self.origin.default_branch.clone(),
            },
            review_comment_id: None,
            request: request.to_string(),
            attachment: None,
            model: "gpt-4".to_string(),
        }
    }
}

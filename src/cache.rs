//! Shared repository cache
//!
//! One bare mirror per project under `mirrors/`, so provisioning a
//! workspace costs a local clone plus an incremental fetch instead of a
//! full network clone. Refreshing a mirror is serialized per project with
//! a file lock; a corrupt mirror is discarded and re-cloned. The cache is
//! an optimization only: callers fall back to a direct clone when it
//! fails.

use std::fs;
use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::{project_key, Storage};

const MIRROR_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

#[derive(Clone)]
pub struct RepositoryCache {
    storage: Storage,
}

impl RepositoryCache {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn mirror_path(&self, project: &str) -> PathBuf {
        self.storage
            .mirrors_dir()
            .join(format!("{}.git", project_key(project)))
    }

    fn mirror_lock_path(&self, project: &str) -> PathBuf {
        self.storage
            .mirrors_dir()
            .join(format!("{}.lock", project_key(project)))
    }

    /// Clone or refresh the project's bare mirror and return its path.
    /// Concurrent callers for the same project serialize on a file lock.
    pub fn ensure_mirror(&self, project: &str, url: &str, default_branch: &str) -> Result<PathBuf> {
        let path = self.mirror_path(project);
        let _lock = FileLock::acquire(self.mirror_lock_path(project), DEFAULT_LOCK_TIMEOUT_MS)?;

        if path.exists() {
            match self.refresh_mirror(&path, url, default_branch) {
                Ok(()) => {
                    debug!(project, "refreshed mirror");
                    return Ok(path);
                }
                Err(err) => {
                    // Corrupt or stale-remote mirror; start over
                    warn!(project, %err, "discarding unusable mirror");
                    fs::remove_dir_all(&path)?;
                }
            }
        }

        self.clone_mirror(&path, url, default_branch)?;
        info!(project, path = %path.display(), "cloned mirror");
        Ok(path)
    }

    fn clone_mirror(&self, path: &Path, url: &str, default_branch: &str) -> Result<()> {
        let repo = Repository::init_bare(path)?;
        let mut remote = repo.remote_with_fetch("origin", url, MIRROR_REFSPEC)?;
        remote.fetch(&[MIRROR_REFSPEC], None, None)?;
        // Local clones of the mirror resolve HEAD, so it must name a
        // branch that exists
        repo.set_head(&format!("refs/heads/{default_branch}"))?;
        Ok(())
    }

    fn refresh_mirror(&self, path: &Path, url: &str, default_branch: &str) -> Result<()> {
        let repo = Repository::open_bare(path)?;
        // The token in the authenticated URL rotates between tasks
        repo.remote_set_url("origin", url)?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&[MIRROR_REFSPEC], None, None)?;
        repo.set_head(&format!("refs/heads/{default_branch}"))?;
        Ok(())
    }

    /// Local-clone the mirror into `dest`, then re-point `origin` at the
    /// real remote so later fetches and pushes hit the host, not the
    /// mirror.
    pub fn seed_workspace(&self, project: &str, dest: &Path, remote_url: &str) -> Result<()> {
        let mirror = self.mirror_path(project);
        let repo = Repository::clone(
            mirror.to_str().ok_or_else(|| {
                crate::error::Error::OperationFailed(format!(
                    "non-utf8 mirror path for {project}"
                ))
            })?,
            dest,
        )?;
        repo.remote_set_url("origin", remote_url)?;
        debug!(project, dest = %dest.display(), "seeded workspace from mirror");
        Ok(())
    }
}

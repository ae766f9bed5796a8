//! Storage layer for pilot
//!
//! Manages persistent engine state under a single state directory:
//!
//! ```text
//! <state_dir>/
//!   tasks/<task_id>.json        # One record per task
//!   events/<task_id>.jsonl      # Append-only event log per task
//!   bills/<task_id>.json        # At most one bill per task
//!   budgets.json                # User credit balances
//!   mirrors/<owner>__<repo>.git # Bare repository mirrors
//!   workspaces/<task_id>/       # Per-task working copies
//! ```
//!
//! Writes go through the atomic temp+rename helpers in `lock`; mutations
//! of shared files are serialized with `FileLock`.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::lock;
use crate::task::TaskId;

/// Storage manager for pilot state
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn task_file(&self, id: TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{id}.json"))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn events_file(&self, id: TaskId) -> PathBuf {
        self.events_dir().join(format!("{id}.jsonl"))
    }

    pub fn bills_dir(&self) -> PathBuf {
        self.root.join("bills")
    }

    pub fn bill_file(&self, id: TaskId) -> PathBuf {
        self.bills_dir().join(format!("{id}.json"))
    }

    pub fn budgets_file(&self) -> PathBuf {
        self.root.join("budgets.json")
    }

    pub fn mirrors_dir(&self) -> PathBuf {
        self.root.join("mirrors")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn workspace_dir(&self, id: TaskId) -> PathBuf {
        self.workspaces_dir().join(id.to_string())
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the full state directory structure
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.tasks_dir())?;
        fs::create_dir_all(self.events_dir())?;
        fs::create_dir_all(self.bills_dir())?;
        fs::create_dir_all(self.mirrors_dir())?;
        fs::create_dir_all(self.workspaces_dir())?;
        Ok(())
    }

    // =========================================================================
    // File I/O helpers (atomic writes for safety)
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data from a file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Append a record to a JSONL file. Callers mutating shared logs must
    /// hold the file's lock; see `lock::lock_path_for`.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        writeln!(file, "{}", json)?;
        file.sync_all()?;

        Ok(())
    }

    /// Read all records from a JSONL file
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Rewrite a JSONL file in full (atomic). Used when a record's mutable
    /// flag changes, e.g. marking an event reversed.
    pub fn rewrite_jsonl<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<()> {
        let mut contents = String::new();
        for record in records {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }
        lock::write_atomic(path, contents.as_bytes())
    }
}

/// Directory-safe key for a project identifier ("owner/repo" etc.).
pub fn project_key(project: &str) -> String {
    let mut key = String::new();
    for ch in project.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            key.push(ch);
        } else {
            key.push_str("__");
        }
    }
    if key.is_empty() {
        "_".to_string()
    } else {
        key
    }
}

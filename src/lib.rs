//! pilot - Task Orchestration Engine
//!
//! This library drives autonomous coding-agent tasks against git-hosted
//! projects: it provisions isolated workspaces, manages branch lifecycle,
//! records an append-only event log with selective undo, and gates/bills
//! execution against a per-user credit ledger.
//!
//! # Core Concepts
//!
//! - **Tasks**: one unit of user-requested work, with a monotonic
//!   scheduled → running → completed/failed lifecycle
//! - **Workspaces**: per-task repository checkouts, never shared
//! - **Repository Cache**: bare mirrors that seed workspaces without a
//!   full network clone
//! - **Event Log**: per-task action history; issue/PR/comment creations
//!   can be undone via compensating host actions
//! - **Budget Ledger**: fixed-point credit balances that gate and get
//!   charged by task execution
//!
//! # Module Organization
//!
//! - `engine`: task state machine - `schedule` gate and `run` with its
//!   always-executed finally phase
//! - `dispatcher`: work queue consumer loop and execution launchers
//! - `workspace`: git operations for a single task's checkout
//! - `cache`: shared bare-mirror store, safe for concurrent seeding
//! - `events` / `undo`: append-only log and reversible-action compensation
//! - `budget`: cost items, bills, and the per-user credit ledger
//! - `host` / `agent`: traits the embedding application implements
//! - `storage` / `lock`: file persistence and concurrency primitives
//! - `config`: configuration loading from `pilot.toml`
//! - `error`: error types and result aliases

pub mod agent;
pub mod branchname;
pub mod budget;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod lock;
pub mod storage;
pub mod task;
pub mod undo;
pub mod workspace;

pub use error::{Error, Result};

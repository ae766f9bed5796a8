//! Configuration loading and management
//!
//! Handles parsing of `pilot.toml` configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for persistent engine state (tasks, events, ledger,
    /// mirrors, workspaces)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Branch naming configuration
    #[serde(default)]
    pub branches: BranchConfig,

    /// Agent pass-through limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Billing configuration
    #[serde(default)]
    pub billing: BillingConfig,

    /// Base URL for task dashboard links embedded in responses
    #[serde(default = "default_dashboard_url")]
    pub dashboard_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            branches: BranchConfig::default(),
            agent: AgentConfig::default(),
            billing: BillingConfig::default(),
            dashboard_base_url: default_dashboard_url(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pilot")
}

fn default_dashboard_url() -> String {
    "https://app.pr-pilot.ai/dashboard/tasks".to_string()
}

/// Branch naming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Prefix for branches created on behalf of a task
    #[serde(default = "default_branch_prefix")]
    pub prefix: String,

    /// Maximum branch name length in characters, before collision suffixes
    #[serde(default = "default_max_branch_len")]
    pub max_name_length: usize,
}

fn default_branch_prefix() -> String {
    "pr-pilot/".to_string()
}

fn default_max_branch_len() -> usize {
    50
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            prefix: default_branch_prefix(),
            max_name_length: default_max_branch_len(),
        }
    }
}

/// Limits handed through to the agent's tool set. Not enforced by the
/// engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning/tool steps per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Ceiling on individual file size the agent may read, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Ceiling on lines returned per file read
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: u32,
}

fn default_max_steps() -> u32 {
    5
}

fn default_max_file_size() -> u64 {
    512 * 1024
}

fn default_max_file_lines() -> u32 {
    2000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_file_size: default_max_file_size(),
            max_file_lines: default_max_file_lines(),
        }
    }
}

/// Billing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Fixed conversion multiplier: credits charged per USD of model cost
    #[serde(default = "default_credits_per_usd")]
    pub credits_per_usd: i64,

    /// Starting balance (whole credits) for lazily created user budgets
    #[serde(default = "default_starting_balance")]
    pub starting_balance: i64,

    /// Discount percent applied to eligible open-source projects
    #[serde(default = "default_oss_discount")]
    pub open_source_discount_pct: u8,
}

fn default_credits_per_usd() -> i64 {
    2
}

fn default_starting_balance() -> i64 {
    5
}

fn default_oss_discount() -> u8 {
    50
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            credits_per_usd: default_credits_per_usd(),
            starting_balance: default_starting_balance(),
            open_source_discount_pct: default_oss_discount(),
        }
    }
}

impl Config {
    /// Load configuration from a `pilot.toml` file, falling back to the
    /// defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.branches.max_name_length <= self.branches.prefix.len() {
            return Err(Error::InvalidConfig(format!(
                "branches.max_name_length ({}) must exceed the prefix length ({})",
                self.branches.max_name_length,
                self.branches.prefix.len()
            )));
        }
        if self.billing.credits_per_usd <= 0 {
            return Err(Error::InvalidConfig(format!(
                "billing.credits_per_usd must be positive, got {}",
                self.billing.credits_per_usd
            )));
        }
        if self.billing.open_source_discount_pct > 100 {
            return Err(Error::InvalidConfig(format!(
                "billing.open_source_discount_pct must be at most 100, got {}",
                self.billing.open_source_discount_pct
            )));
        }
        Ok(())
    }
}

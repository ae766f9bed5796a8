//! Money, cost accounting, and the per-user credit ledger
//!
//! No floats anywhere in billing. `Usd` and `Credits` are i64 newtypes with
//! six implied decimal places (micros), so a cost item worth $0.0015 is
//! `Usd(1_500)` and a starting balance of 5 credits is
//! `Credits(5_000_000)`. Conversion and discounts are pure integer
//! arithmetic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::Storage;
use crate::task::TaskId;

const MICROS: i64 = 1_000_000;

/// US dollars with six implied decimal places
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd(pub i64);

impl Usd {
    pub const ZERO: Usd = Usd(0);

    pub fn from_micros(micros: i64) -> Self {
        Usd(micros)
    }

    pub fn micros(self) -> i64 {
        self.0
    }
}

impl std::ops::Add for Usd {
    type Output = Usd;
    fn add(self, rhs: Usd) -> Usd {
        Usd(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Usd {
    fn sum<I: Iterator<Item = Usd>>(iter: I) -> Usd {
        iter.fold(Usd::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_fixed(f, self.0, "$")
    }
}

/// Internal credits with six implied decimal places
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(pub i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    /// Whole credits, e.g. `Credits::whole(5)` for a 5-credit grant
    pub fn whole(n: i64) -> Self {
        Credits(n * MICROS)
    }

    pub fn from_micros(micros: i64) -> Self {
        Credits(micros)
    }

    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Add for Credits {
    type Output = Credits;
    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Credits {
    type Output = Credits;
    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_fixed(f, self.0, "")
    }
}

/// Render a micros value as a plain decimal with trailing zeros trimmed
/// to two places minimum, e.g. 1_500_000 -> "1.50", -1_500_000 -> "-1.50".
fn write_fixed(f: &mut fmt::Formatter<'_>, micros: i64, prefix: &str) -> fmt::Result {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let whole = abs / MICROS as u64;
    let frac = abs % MICROS as u64;

    // Trim to the shortest representation, but keep at least two places
    let mut frac_str = format!("{frac:06}");
    while frac_str.len() > 2 && frac_str.ends_with('0') {
        frac_str.pop();
    }
    write!(f, "{sign}{prefix}{whole}.{frac_str}")
}

/// One line of cost accrued by the agent during a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostItem {
    pub title: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
    pub cost: Usd,
}

/// Final bill for one task; at most one exists, written in the finally
/// phase of `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBill {
    pub task_id: TaskId,
    pub total_cost: Usd,
    pub discount_pct: u8,
    pub final_cost: Credits,
    pub created_at: DateTime<Utc>,
}

/// Decides the discount applied to a task's bill. The default grants none;
/// embedders plug in e.g. an open-source-repository check.
pub trait DiscountPolicy: Send + Sync {
    /// Discount percent (0..=100) for a task against `project`
    fn discount_pct(&self, project: &str) -> u8;
}

/// No discount for anyone
#[derive(Debug, Default)]
pub struct NoDiscount;

impl DiscountPolicy for NoDiscount {
    fn discount_pct(&self, _project: &str) -> u8 {
        0
    }
}

/// Flat discount for every project; pairs with a config percentage
#[derive(Debug)]
pub struct FlatDiscount(pub u8);

impl DiscountPolicy for FlatDiscount {
    fn discount_pct(&self, _project: &str) -> u8 {
        self.0
    }
}

/// Sum cost items, apply the integer discount, convert to credits via the
/// fixed multiplier. Pure; the caller persists the result.
pub fn compute_bill(
    task_id: TaskId,
    items: &[CostItem],
    discount_pct: u8,
    credits_per_usd: i64,
) -> TaskBill {
    let total_cost: Usd = items.iter().map(|item| item.cost).sum();
    let discount_pct = discount_pct.min(100);

    let discounted_micros = total_cost.micros() * (100 - discount_pct as i64) / 100;
    let final_cost = Credits(discounted_micros * credits_per_usd);

    TaskBill {
        task_id,
        total_cost,
        discount_pct,
        final_cost,
        created_at: Utc::now(),
    }
}

/// Per-user credit balances. Accounts are lazily created with the starting
/// balance; the same user must never be created twice.
pub trait BudgetLedger: Send + Sync {
    /// Current balance, creating the account with `starting` if absent
    fn get_or_create(&self, user: &str, starting: Credits) -> Result<Credits>;

    /// Balance without creating; zero-like absence is `None`
    fn balance(&self, user: &str) -> Result<Option<Credits>>;

    /// Subtract `amount` from the user's balance and return the new
    /// balance. Balances may go negative.
    fn debit(&self, user: &str, amount: Credits) -> Result<Credits>;
}

/// In-memory ledger for tests and embedders with their own persistence
#[derive(Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<String, Credits>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a balance directly, for tests
    pub fn set_balance(&self, user: &str, balance: Credits) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(user.to_string(), balance);
        }
    }
}

impl BudgetLedger for InMemoryLedger {
    fn get_or_create(&self, user: &str, starting: Credits) -> Result<Credits> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| Error::OperationFailed("ledger lock poisoned".to_string()))?;
        Ok(*balances.entry(user.to_string()).or_insert(starting))
    }

    fn balance(&self, user: &str) -> Result<Option<Credits>> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| Error::OperationFailed("ledger lock poisoned".to_string()))?;
        Ok(balances.get(user).copied())
    }

    fn debit(&self, user: &str, amount: Credits) -> Result<Credits> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| Error::OperationFailed("ledger lock poisoned".to_string()))?;
        let balance = balances.entry(user.to_string()).or_insert(Credits::ZERO);
        *balance = *balance - amount;
        Ok(*balance)
    }
}

/// File-backed ledger: `budgets.json` mutated under a file lock, so
/// concurrent debits from separate workers never lose updates.
pub struct FileLedger {
    storage: Storage,
}

impl FileLedger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn load(&self) -> Result<HashMap<String, Credits>> {
        let path = self.storage.budgets_file();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        self.storage.read_json(&path)
    }

    fn store(&self, balances: &HashMap<String, Credits>) -> Result<()> {
        self.storage.write_json(&self.storage.budgets_file(), balances)
    }

    fn locked(&self) -> Result<FileLock> {
        FileLock::acquire(
            lock::lock_path_for(&self.storage.budgets_file()),
            DEFAULT_LOCK_TIMEOUT_MS,
        )
    }
}

impl BudgetLedger for FileLedger {
    fn get_or_create(&self, user: &str, starting: Credits) -> Result<Credits> {
        let _lock = self.locked()?;
        let mut balances = self.load()?;
        let balance = *balances.entry(user.to_string()).or_insert(starting);
        self.store(&balances)?;
        Ok(balance)
    }

    fn balance(&self, user: &str) -> Result<Option<Credits>> {
        let _lock = self.locked()?;
        Ok(self.load()?.get(user).copied())
    }

    fn debit(&self, user: &str, amount: Credits) -> Result<Credits> {
        let _lock = self.locked()?;
        let mut balances = self.load()?;
        let balance = balances.entry(user.to_string()).or_insert(Credits::ZERO);
        *balance = *balance - amount;
        let new_balance = *balance;
        self.store(&balances)?;
        info!(user, new_balance = %new_balance, "debited ledger");
        Ok(new_balance)
    }
}

/// Persist a bill, refusing to overwrite an existing one
pub fn write_bill(storage: &Storage, bill: &TaskBill) -> Result<()> {
    let path = storage.bill_file(bill.task_id);
    if path.exists() {
        return Err(Error::OperationFailed(format!(
            "bill already exists for task {}",
            bill.task_id
        )));
    }
    storage.write_json(&path, bill)
}

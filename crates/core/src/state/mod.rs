//! Persistent state: unified database, sessions, usage ledger.

pub mod db;
pub mod sessions;
pub mod usage;

pub use db::PrismDb;
pub use sessions::{SessionStore, StoredMessage};
pub use usage::{BudgetExceeded, BudgetGate, UsageLedger, UsageTotals};

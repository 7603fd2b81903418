//! Balance Ledger Service
//!
//! Holds available/reserved balances per (client, asset) and mutates them
//! exclusively through all-or-nothing wallet-operation batches: the batch is
//! persisted first, and only a successful persist commits the in-memory
//! state and emits balance notifications.
//!
//! **Key invariants:**
//! - O(1) balance reads; absent entries read as zero
//! - No partial mutation: a failed persist leaves every balance untouched
//! - No validation: sufficiency checks belong to the caller; a
//!   balance-negative instruction is applied faithfully (tolerated legacy
//!   behavior, surfaced only through a read-only diagnostic)

pub mod events;
pub mod ledger;

pub use events::{BalanceEventReceivers, BalanceEventSenders, BalanceUpdateEvent, BalanceUpdateNotification};
pub use ledger::BalanceLedger;

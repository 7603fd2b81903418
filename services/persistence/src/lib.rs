//! Persistence contract for the matching core
//!
//! The core treats durable storage as an opaque collaborator: a batch of
//! balances, order-book snapshots and completed orders either persists
//! atomically (`true`) or fails as a whole (`false`). Nothing in memory may
//! be committed before the batch succeeds. Concrete backends live outside
//! this workspace; the in-memory implementation here backs tests and local
//! runs.

pub mod batch;
pub mod memory;

pub use batch::{AssetBalanceSnapshot, OrderBookSideSnapshot, PersistenceBatch};
pub use memory::InMemoryPersistence;

use types::order::LimitOrder;

/// Atomic durable storage consumed by the matching core.
///
/// `persist` returning `false` means the whole batch failed: the caller
/// must discard its tentative state and report a runtime failure. Retry is
/// the caller's responsibility, never this layer's.
pub trait PersistenceManager {
    fn persist(&mut self, batch: &PersistenceBatch) -> bool;

    /// Resting limit orders to repopulate books at startup.
    fn load_limit_orders(&self) -> Vec<LimitOrder>;

    /// Untriggered stop orders to repopulate stop books at startup.
    fn load_stop_limit_orders(&self) -> Vec<LimitOrder>;

    /// Full-side snapshot pushed after every book mutation, for recovery
    /// and observability.
    fn update_order_book(&mut self, snapshot: OrderBookSideSnapshot);
}

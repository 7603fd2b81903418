//! In-memory persistence backend
//!
//! Backs tests and local runs. Stores the latest state per key the way a
//! durable backend would, and exposes a programmable failure switch so
//! rollback paths can be exercised.

use std::collections::HashMap;

use tracing::warn;
use types::ids::{AssetId, AssetPairId, ClientId};
use types::order::LimitOrder;

use crate::batch::{AssetBalanceSnapshot, OrderBookSideSnapshot, PersistenceBatch};
use crate::PersistenceManager;

/// Volatile `PersistenceManager` implementation.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    balances: HashMap<(ClientId, AssetId), AssetBalanceSnapshot>,
    order_books: HashMap<(AssetPairId, bool), Vec<LimitOrder>>,
    stop_order_books: HashMap<(AssetPairId, bool), Vec<LimitOrder>>,
    completed_orders: Vec<LimitOrder>,
    sequence_number: Option<u64>,
    seeded_limit_orders: Vec<LimitOrder>,
    seeded_stop_orders: Vec<LimitOrder>,
    fail_next: u32,
    persist_calls: u64,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed orders returned by `load_limit_orders` at startup.
    pub fn with_limit_orders(mut self, orders: Vec<LimitOrder>) -> Self {
        self.seeded_limit_orders = orders;
        self
    }

    /// Seed orders returned by `load_stop_limit_orders` at startup.
    pub fn with_stop_limit_orders(mut self, orders: Vec<LimitOrder>) -> Self {
        self.seeded_stop_orders = orders;
        self
    }

    /// Make the next `count` persist calls fail.
    pub fn fail_next(&mut self, count: u32) {
        self.fail_next = count;
    }

    pub fn persist_calls(&self) -> u64 {
        self.persist_calls
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.sequence_number
    }

    pub fn stored_balance(&self, client_id: &ClientId, asset_id: &AssetId) -> Option<&AssetBalanceSnapshot> {
        self.balances.get(&(*client_id, asset_id.clone()))
    }

    pub fn stored_order_book(&self, pair: &AssetPairId, is_buy_side: bool) -> Option<&Vec<LimitOrder>> {
        self.order_books.get(&(pair.clone(), is_buy_side))
    }

    pub fn completed_orders(&self) -> &[LimitOrder] {
        &self.completed_orders
    }
}

impl PersistenceManager for InMemoryPersistence {
    fn persist(&mut self, batch: &PersistenceBatch) -> bool {
        self.persist_calls += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            warn!(sequence = ?batch.sequence_number, "persist failed (programmed failure)");
            return false;
        }

        for balance in &batch.balances {
            self.balances.insert(
                (balance.client_id, balance.asset_id.clone()),
                balance.clone(),
            );
        }
        for book in &batch.order_books {
            self.order_books.insert(
                (book.asset_pair_id.clone(), book.is_buy_side),
                book.orders.clone(),
            );
        }
        for book in &batch.stop_order_books {
            self.stop_order_books.insert(
                (book.asset_pair_id.clone(), book.is_buy_side),
                book.orders.clone(),
            );
        }
        self.completed_orders.extend(batch.completed_orders.iter().cloned());
        if batch.sequence_number.is_some() {
            self.sequence_number = batch.sequence_number;
        }
        true
    }

    fn load_limit_orders(&self) -> Vec<LimitOrder> {
        self.seeded_limit_orders.clone()
    }

    fn load_stop_limit_orders(&self) -> Vec<LimitOrder> {
        self.seeded_stop_orders.clone()
    }

    fn update_order_book(&mut self, snapshot: OrderBookSideSnapshot) {
        self.order_books.insert(
            (snapshot.asset_pair_id.clone(), snapshot.is_buy_side),
            snapshot.orders,
        );
    }
}

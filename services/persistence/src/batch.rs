//! Batch entities handed to the persistence backend

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{AssetId, AssetPairId, ClientId};
use types::order::LimitOrder;

/// Point-in-time balance of one (client, asset), as it must be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalanceSnapshot {
    pub client_id: ClientId,
    pub asset_id: AssetId,
    pub balance: Decimal,
    pub reserved: Decimal,
}

/// One side of one order book, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSideSnapshot {
    pub asset_pair_id: AssetPairId,
    pub is_buy_side: bool,
    pub orders: Vec<LimitOrder>,
}

/// Everything one sequenced operation needs stored, atomically.
///
/// An empty batch is valid and persists trivially.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistenceBatch {
    pub balances: Vec<AssetBalanceSnapshot>,
    pub order_books: Vec<OrderBookSideSnapshot>,
    pub stop_order_books: Vec<OrderBookSideSnapshot>,
    /// Orders leaving the live set (matched or cancelled).
    pub completed_orders: Vec<LimitOrder>,
    pub sequence_number: Option<u64>,
}

impl PersistenceBatch {
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
            && self.order_books.is_empty()
            && self.stop_order_books.is_empty()
            && self.completed_orders.is_empty()
    }

    pub fn with_balances(mut self, balances: Vec<AssetBalanceSnapshot>) -> Self {
        self.balances = balances;
        self
    }

    pub fn with_sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }
}

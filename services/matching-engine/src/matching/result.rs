//! Matching result
//!
//! Matching never touches live state: it works on a side copy and mutated
//! order clones, and hands everything back here. The lifecycle layer
//! commits a result only after the persistence batch succeeds; a rejected
//! result commits nothing, which is what makes market-order matching
//! all-or-nothing.

use types::ids::OrderId;
use types::numeric::{Price, Volume};
use types::order::{LimitOrder, OrderStatus};
use types::trade::MatchedTrade;
use types::wallet::WalletOperation;

/// Outcome of running a matching algorithm against one book side.
#[derive(Debug, Clone)]
pub struct MatchingResult {
    /// The aggressor's resulting status.
    pub status: OrderStatus,
    /// Achieved execution price (market orders only).
    pub execution_price: Option<Price>,
    /// The aggressor's unfilled signed volume after the walk.
    pub remaining_volume: Volume,
    /// Mutated copies of every matched resting order.
    pub matched_orders: Vec<LimitOrder>,
    /// Matched orders whose remaining volume reached zero.
    pub completed_order_ids: Vec<OrderId>,
    /// The one partially matched resting order, if any.
    pub uncompleted_order: Option<LimitOrder>,
    /// Resting orders set aside for cancellation (not restored): owners
    /// failing the funds check, expired orders, zero-volume middle legs.
    pub cancelled_order_ids: Vec<OrderId>,
    /// Same-client resting orders, restored untouched.
    pub skipped_order_ids: Vec<OrderId>,
    /// One entry per matched resting order: four legs plus fee transfers.
    pub trades: Vec<MatchedTrade>,
    /// The aggressor's wallet movements.
    pub own_cash_movements: Vec<WalletOperation>,
    /// The resting owners' wallet movements (reserve releases included).
    pub opposite_cash_movements: Vec<WalletOperation>,
}

impl MatchingResult {
    pub fn rejected(status: OrderStatus, remaining_volume: Volume) -> Self {
        Self {
            status,
            execution_price: None,
            remaining_volume,
            matched_orders: Vec::new(),
            completed_order_ids: Vec::new(),
            uncompleted_order: None,
            cancelled_order_ids: Vec::new(),
            skipped_order_ids: Vec::new(),
            trades: Vec::new(),
            own_cash_movements: Vec::new(),
            opposite_cash_movements: Vec::new(),
        }
    }

    /// A rejection that still carries set-aside cancellations.
    pub fn rejected_with_cancellations(
        status: OrderStatus,
        remaining_volume: Volume,
        cancelled_order_ids: Vec<OrderId>,
    ) -> Self {
        let mut result = Self::rejected(status, remaining_volume);
        result.cancelled_order_ids = cancelled_order_ids;
        result
    }

    pub fn has_fills(&self) -> bool {
        !self.trades.is_empty()
    }

    /// All wallet movements of the match in application order.
    pub fn all_cash_movements(&self) -> Vec<WalletOperation> {
        let mut operations = self.own_cash_movements.clone();
        operations.extend(self.opposite_cash_movements.iter().cloned());
        operations
    }
}

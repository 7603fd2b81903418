//! Outbound events of the matching engine
//!
//! The sequencer writes, publisher threads drain. Queues are unbounded:
//! a slow publisher backpressures the drain side and no financial event
//! is ever dropped.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use types::ids::AssetPairId;
use types::numeric::{Price, Volume};
use types::order::{LimitOrder, MarketOrder, OrderStatus};
use types::trade::MatchedTrade;

/// A limit order's post-request snapshot plus the trades it took part in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderReport {
    pub order: LimitOrder,
    pub trades: Vec<MatchedTrade>,
}

/// A market order's outcome plus the trades it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrderReport {
    pub order: MarketOrder,
    pub trades: Vec<MatchedTrade>,
}

/// Per-request execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub message_id: String,
    /// Unix nanos.
    pub timestamp: i64,
    pub market_order: Option<MarketOrderReport>,
    pub limit_orders: Vec<LimitOrderReport>,
}

impl ExecutionEvent {
    pub fn new(message_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp,
            market_order: None,
            limit_orders: Vec::new(),
        }
    }

    pub fn add_limit_order(&mut self, order: LimitOrder, trades: Vec<MatchedTrade>) {
        self.limit_orders.push(LimitOrderReport { order, trades });
    }

    pub fn add_rejected_limit_order(&mut self, mut order: LimitOrder, status: OrderStatus, now: i64) {
        order.update_status(status, now);
        self.add_limit_order(order, Vec::new());
    }
}

/// Best-quote movement on one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdateEvent {
    pub asset_pair_id: AssetPairId,
    pub price: Price,
    pub volume: Volume,
}

/// Sequencer-side handles for all engine queues.
#[derive(Debug, Clone)]
pub struct EngineEventSenders {
    pub executions: Sender<ExecutionEvent>,
    pub quotes: Sender<QuoteUpdateEvent>,
}

/// Publisher-side handles.
#[derive(Debug)]
pub struct EngineEventReceivers {
    pub executions: Receiver<ExecutionEvent>,
    pub quotes: Receiver<QuoteUpdateEvent>,
}

/// Create the connected sender/receiver pair.
pub fn engine_event_queues() -> (EngineEventSenders, EngineEventReceivers) {
    let (execution_tx, execution_rx) = unbounded();
    let (quote_tx, quote_rx) = unbounded();
    (
        EngineEventSenders {
            executions: execution_tx,
            quotes: quote_tx,
        },
        EngineEventReceivers {
            executions: execution_rx,
            quotes: quote_rx,
        },
    )
}

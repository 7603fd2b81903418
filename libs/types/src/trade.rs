//! Trade legs produced by matching
//!
//! Every match between an aggressor and a resting order yields four legs:
//! base and quote asset for each counterparty. Across the pair the base
//! legs net to zero and the quote legs net to zero, within the asset's
//! rounding unit.

use crate::fee::FeeTransfer;
use crate::ids::{AssetId, AssetPairId, ClientId, OrderId, TradeId};
use crate::numeric::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The role a client played in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeRole {
    /// Resting order providing liquidity.
    Maker,
    /// Incoming order taking liquidity.
    Taker,
}

/// One immutable settlement leg of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub id: TradeId,
    pub asset_pair_id: AssetPairId,
    pub client_id: ClientId,
    pub asset_id: AssetId,
    /// Signed amount this client gains (+) or gives up (-) in `asset_id`.
    pub volume: Decimal,
    /// Execution price of the match (the resting order's price).
    pub price: Price,
    /// The counterparty's order.
    pub opposite_order_id: OrderId,
    pub opposite_order_external_id: String,
    pub role: TradeRole,
    /// Unix nanos.
    pub timestamp: i64,
}

impl TradeLeg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset_pair_id: AssetPairId,
        client_id: ClientId,
        asset_id: AssetId,
        volume: Decimal,
        price: Price,
        opposite_order_id: OrderId,
        opposite_order_external_id: impl Into<String>,
        role: TradeRole,
        timestamp: i64,
    ) -> Self {
        Self {
            id: TradeId::new(),
            asset_pair_id,
            client_id,
            asset_id,
            volume,
            price,
            opposite_order_id,
            opposite_order_external_id: opposite_order_external_id.into(),
            role,
            timestamp,
        }
    }
}

/// The four legs of one match plus its realized fee movements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedTrade {
    pub legs: Vec<TradeLeg>,
    pub fee_transfers: Vec<FeeTransfer>,
}

impl MatchedTrade {
    /// Net volume across legs for one asset; zero for a conserved match.
    pub fn net_volume(&self, asset_id: &AssetId) -> Decimal {
        self.legs
            .iter()
            .filter(|leg| &leg.asset_id == asset_id)
            .map(|leg| leg.volume)
            .sum()
    }
}

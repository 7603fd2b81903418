//! Order types and the order status machine
//!
//! Side is never stored: it is derived from the sign of the order volume
//! (positive = buy, negative = sell). Limit and stop-limit orders share one
//! record; market orders are a transient variant that never rests.

use crate::fee::FeeInstruction;
use crate::ids::{AssetPairId, ClientId, OrderId};
use crate::numeric::{Price, Volume};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side, derived from the volume sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Kind of resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    StopLimit,
}

/// Order status machine.
///
/// `Pending` (untriggered stop) and `InOrderBook`/`Processing` are the only
/// live states; everything else is a terminal sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Stop order admitted, trigger not yet reached.
    Pending,
    /// Resting in the order book.
    InOrderBook,
    /// Partially filled, still resting.
    Processing,
    /// Fully filled.
    Matched,
    /// Cancelled by the client or a cancel-and-replace flow.
    Cancelled,
    /// Funds check failed (admission reserve or match-time cover).
    NotEnoughFunds,
    /// Market order could not be fully satisfied by the book.
    NoLiquidity,
    /// Price missing, non-positive, or beyond the pair's accuracy.
    InvalidPrice,
    /// Volume zero or beyond the base asset's accuracy.
    InvalidVolume,
    /// Asset or asset pair absent from reference data.
    UnknownAsset,
    /// Fee instruction invalid or unaffordable.
    InvalidFee,
    /// Admission would cross the client's own resting order.
    LeadToNegativeSpread,
    /// Book already holds the configured maximum of resting orders.
    OrderBookMaxSizeReached,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            OrderStatus::Pending | OrderStatus::InOrderBook | OrderStatus::Processing
        )
    }
}

/// A limit or stop-limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrder {
    /// Engine-assigned identifier.
    pub id: OrderId,
    /// Client-assigned identifier; the key for idempotent cancel/replace.
    pub external_id: String,
    pub client_id: ClientId,
    pub asset_pair_id: AssetPairId,
    /// Resting price. For an untriggered stop order this is the execution
    /// price it will be converted to once triggered.
    pub price: Price,
    /// Original signed volume.
    pub volume: Volume,
    /// Unfilled signed volume; same sign as `volume`, |remaining| <= |volume|.
    pub remaining_volume: Volume,
    pub status: OrderStatus,
    pub order_type: OrderType,
    /// Unix nanos.
    pub created_at: i64,
    pub last_match_time: Option<i64>,
    pub expiry_time: Option<i64>,
    /// Stop trigger: fires when the opposite quote falls to this level.
    pub lower_limit_price: Option<Price>,
    /// Execution price once the lower trigger fires.
    pub lower_price: Option<Price>,
    /// Stop trigger: fires when the opposite quote rises to this level.
    pub upper_limit_price: Option<Price>,
    /// Execution price once the upper trigger fires.
    pub upper_price: Option<Price>,
    pub fees: Vec<FeeInstruction>,
    /// This order's contribution to its client's reserved balance in the
    /// limiting asset (quote for buys, base for sells).
    pub reserved_limit_volume: Decimal,
}

impl LimitOrder {
    pub fn new(
        external_id: impl Into<String>,
        client_id: ClientId,
        asset_pair_id: impl Into<AssetPairId>,
        price: Price,
        volume: Volume,
        created_at: i64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            external_id: external_id.into(),
            client_id,
            asset_pair_id: asset_pair_id.into(),
            price,
            volume,
            remaining_volume: volume,
            status: OrderStatus::InOrderBook,
            order_type: OrderType::Limit,
            created_at,
            last_match_time: None,
            expiry_time: None,
            lower_limit_price: None,
            lower_price: None,
            upper_limit_price: None,
            upper_price: None,
            fees: Vec::new(),
            reserved_limit_volume: Decimal::ZERO,
        }
    }

    /// Create an untriggered stop-limit order.
    ///
    /// At least one of the (trigger, execution price) bounds must be set;
    /// the submission service validates this before admission.
    #[allow(clippy::too_many_arguments)]
    pub fn new_stop_limit(
        external_id: impl Into<String>,
        client_id: ClientId,
        asset_pair_id: impl Into<AssetPairId>,
        volume: Volume,
        lower: Option<(Price, Price)>,
        upper: Option<(Price, Price)>,
        created_at: i64,
    ) -> Self {
        let mut order = Self::new(
            external_id,
            client_id,
            asset_pair_id,
            Price::ZERO,
            volume,
            created_at,
        );
        order.order_type = OrderType::StopLimit;
        order.status = OrderStatus::Pending;
        if let Some((limit, price)) = lower {
            order.lower_limit_price = Some(limit);
            order.lower_price = Some(price);
        }
        if let Some((limit, price)) = upper {
            order.upper_limit_price = Some(limit);
            order.upper_price = Some(price);
        }
        order
    }

    pub fn with_fees(mut self, fees: Vec<FeeInstruction>) -> Self {
        self.fees = fees;
        self
    }

    pub fn is_buy_side(&self) -> bool {
        self.volume.is_buy()
    }

    pub fn side(&self) -> Side {
        if self.is_buy_side() {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn abs_volume(&self) -> Decimal {
        self.volume.abs()
    }

    pub fn abs_remaining_volume(&self) -> Decimal {
        self.remaining_volume.abs()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiry_time, Some(expiry) if expiry <= now)
    }

    pub fn update_status(&mut self, status: OrderStatus, now: i64) {
        self.status = status;
        self.last_match_time = Some(now);
    }
}

/// A market order: transient, never rests, has no price until matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub id: OrderId,
    pub external_id: String,
    pub client_id: ClientId,
    pub asset_pair_id: AssetPairId,
    /// Signed volume. Denominated in the base asset when `straight`,
    /// in the quoting asset otherwise.
    pub volume: Volume,
    /// True: volume in base asset. False: volume in quoting asset.
    pub straight: bool,
    pub status: OrderStatus,
    pub created_at: i64,
    pub last_match_time: Option<i64>,
    /// Achieved execution price, set after matching.
    pub price: Option<Price>,
    pub fees: Vec<FeeInstruction>,
}

impl MarketOrder {
    pub fn new(
        external_id: impl Into<String>,
        client_id: ClientId,
        asset_pair_id: impl Into<AssetPairId>,
        volume: Volume,
        straight: bool,
        created_at: i64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            external_id: external_id.into(),
            client_id,
            asset_pair_id: asset_pair_id.into(),
            volume,
            straight,
            status: OrderStatus::Pending,
            created_at,
            last_match_time: None,
            price: None,
            fees: Vec::new(),
        }
    }

    pub fn with_fees(mut self, fees: Vec<FeeInstruction>) -> Self {
        self.fees = fees;
        self
    }

    /// The side the order takes in the base asset.
    ///
    /// A non-straight order's volume sign refers to the quoting asset:
    /// buying quote is selling base, so the base side inverts.
    pub fn is_buy_side(&self) -> bool {
        if self.straight {
            self.volume.is_buy()
        } else {
            !self.volume.is_buy()
        }
    }

    /// Side by the raw volume sign, regardless of denomination.
    pub fn is_orig_buy_side(&self) -> bool {
        self.volume.is_buy()
    }

    pub fn side(&self) -> Side {
        if self.is_buy_side() {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn abs_volume(&self) -> Decimal {
        self.volume.abs()
    }

    pub fn update_status(&mut self, status: OrderStatus, now: i64) {
        self.status = status;
        self.last_match_time = Some(now);
    }
}

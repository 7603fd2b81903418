//! Matching algorithms
//!
//! Two documented algorithms with different outcome policies:
//!
//! - [`market::match_market_order`] is all-or-nothing. A market order that
//!   cannot be fully satisfied, or whose owner cannot cover the accumulated
//!   notional, commits nothing.
//! - [`limit::match_limit_order`] is partial-fill tolerant. An aggressing
//!   limit order commits the fills it achieved and rests the remainder.
//!
//! Both walk a point-in-time copy of the opposite side and share the
//! per-fill plumbing below: resting-owner funds check, the four wallet
//! movements, maker/taker fee application, and the resting-order update.

pub mod limit;
pub mod market;
pub mod result;

pub use limit::match_limit_order;
pub use market::match_market_order;
pub use result::MatchingResult;

use std::collections::HashMap;

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use types::assets::{Asset, AssetPair, AssetsCache};
use types::fee::FeeInstruction;
use types::ids::{AssetId, ClientId, OrderId};
use types::numeric::{round_half_up, Volume};
use types::order::{LimitOrder, OrderStatus};
use types::trade::{MatchedTrade, TradeLeg, TradeRole};
use types::wallet::WalletOperation;

use balance_ledger::BalanceLedger;

use crate::fees::{process_fees, AvailableBalances};
use crate::registry::OrderRegistry;

/// Read-only surroundings of one matching run.
pub struct MatchContext<'a> {
    pub registry: &'a OrderRegistry,
    pub ledger: &'a BalanceLedger,
    pub assets: &'a AssetsCache,
    pub pair: &'a AssetPair,
    pub base_asset: &'a Asset,
    pub quote_asset: &'a Asset,
}

/// The aggressing order as the fill step needs to see it.
pub(crate) struct Aggressor<'a> {
    pub client_id: ClientId,
    pub order_id: OrderId,
    pub external_id: &'a str,
    pub fees: &'a [FeeInstruction],
    /// Base-asset side.
    pub is_buy: bool,
}

/// Everything one successful fill produces.
pub(crate) struct Fill {
    pub resting_copy: LimitOrder,
    pub completed: bool,
    pub own_operations: Vec<WalletOperation>,
    pub opposite_operations: Vec<WalletOperation>,
    pub trade: MatchedTrade,
}

/// Outcome of attempting one fill against the book head.
pub(crate) enum FillStep {
    Filled(Box<Fill>),
    /// Set the resting order aside for cancellation and walk on.
    CancelResting,
    /// Reject the aggressor with this status; nothing commits.
    Abort(OrderStatus),
}

/// Attempt one fill: maker funds, wallet movements, fees, resting update.
///
/// `market_rounded`/`opposite_rounded` are the aggressor's signed base and
/// quote movements, already scaled to the asset accuracies.
#[allow(clippy::too_many_arguments)]
pub(crate) fn try_fill(
    ctx: &MatchContext<'_>,
    aggressor: &Aggressor<'_>,
    resting: &LimitOrder,
    market_rounded: Decimal,
    opposite_rounded: Decimal,
    available: &mut AvailableBalances,
    maker_reserved: &mut HashMap<(ClientId, AssetId), Decimal>,
    now: i64,
) -> FillStep {
    let base = &ctx.pair.base_asset_id;
    let quote = &ctx.pair.quoting_asset_id;
    let is_buy = aggressor.is_buy;

    // The resting owner must still be able to deliver its side of this
    // fill out of the reserve actually backed by its balance.
    let maker_limit_asset = if resting.is_buy_side() { quote } else { base };
    let maker_limit_accuracy = if resting.is_buy_side() {
        ctx.quote_asset.accuracy
    } else {
        ctx.base_asset.accuracy
    };
    let needed = if is_buy { market_rounded } else { opposite_rounded };
    let key = (resting.client_id, maker_limit_asset.clone());
    let maker_available = *maker_reserved.entry(key.clone()).or_insert_with(|| {
        ctx.ledger
            .get_available_reserved_balance(&resting.client_id, maker_limit_asset)
    });
    debug!(
        order = %resting.external_id,
        client = %resting.client_id,
        asset = %maker_limit_asset,
        available = %maker_available,
        needed = %needed,
        "maker funds check"
    );
    if maker_available < needed {
        return FillStep::CancelResting;
    }
    maker_reserved.insert(
        key,
        round_half_up(maker_available - needed, maker_limit_accuracy),
    );

    let own_base = WalletOperation::new(
        aggressor.client_id,
        base.clone(),
        market_rounded,
        Decimal::ZERO,
        now,
    );
    let own_quote = WalletOperation::new(
        aggressor.client_id,
        quote.clone(),
        opposite_rounded,
        Decimal::ZERO,
        now,
    );
    // A negative movement on the resting side also releases the matching
    // share of its reserve.
    let maker_base = WalletOperation::new(
        resting.client_id,
        base.clone(),
        -market_rounded,
        (-market_rounded).min(Decimal::ZERO),
        now,
    );
    let maker_quote = WalletOperation::new(
        resting.client_id,
        quote.clone(),
        -opposite_rounded,
        (-opposite_rounded).min(Decimal::ZERO),
        now,
    );

    let mut own_operations = vec![own_base, own_quote];
    let mut opposite_operations = vec![maker_base, maker_quote];

    // Maker fees first, against the resting order's receipt leg.
    let (maker_receipt_asset, maker_receipt_amount) = if is_buy {
        (quote, -opposite_rounded)
    } else {
        (base, -market_rounded)
    };
    let maker_fees = match process_fees(
        &resting.fees,
        TradeRole::Maker,
        resting.client_id,
        maker_receipt_asset,
        maker_receipt_amount,
        ctx.pair,
        resting.price,
        ctx.assets,
        available,
        ctx.ledger,
        now,
    ) {
        Ok(applied) => applied,
        Err(error) => {
            warn!(order = %resting.external_id, %error, "maker fee failed; cancelling resting order");
            return FillStep::CancelResting;
        }
    };
    opposite_operations.extend(maker_fees.operations);

    // Taker fees against the aggressor's receipt leg. A funds failure
    // rejects the whole aggressor, an invalid instruction likewise.
    let (taker_receipt_asset, taker_receipt_amount) = if is_buy {
        (base, market_rounded)
    } else {
        (quote, opposite_rounded)
    };
    let taker_fees = match process_fees(
        aggressor.fees,
        TradeRole::Taker,
        aggressor.client_id,
        taker_receipt_asset,
        taker_receipt_amount,
        ctx.pair,
        resting.price,
        ctx.assets,
        available,
        ctx.ledger,
        now,
    ) {
        Ok(applied) => applied,
        Err(error) if error.is_not_enough_funds() => {
            return FillStep::Abort(OrderStatus::NotEnoughFunds);
        }
        Err(_) => return FillStep::Abort(OrderStatus::InvalidFee),
    };
    own_operations.extend(taker_fees.operations);

    // Mutate a copy; the caller commits copies only on success.
    let mut resting_copy = resting.clone();
    if resting_copy.reserved_limit_volume > Decimal::ZERO {
        let delivered = if -market_rounded < Decimal::ZERO {
            -market_rounded
        } else {
            -opposite_rounded
        };
        resting_copy.reserved_limit_volume = round_half_up(
            resting_copy.reserved_limit_volume + delivered,
            maker_limit_accuracy,
        );
    }

    let previous_remaining = resting_copy.remaining_volume.as_decimal();
    let new_remaining = round_half_up(
        previous_remaining + market_rounded,
        ctx.base_asset.accuracy,
    );
    let completed = new_remaining.signum() != previous_remaining.signum();
    if completed {
        if new_remaining.signum() * previous_remaining.signum() < Decimal::ZERO {
            warn!(
                order = %resting.external_id,
                previous = %previous_remaining,
                current = %new_remaining,
                "matched volume overflowed"
            );
        }
        resting_copy.remaining_volume = Volume::ZERO;
        resting_copy.update_status(OrderStatus::Matched, now);
        if resting_copy.reserved_limit_volume > Decimal::ZERO {
            // Whatever reserve rounding left behind goes back to the owner.
            let release_asset = if -market_rounded < Decimal::ZERO {
                base.clone()
            } else {
                quote.clone()
            };
            opposite_operations.push(WalletOperation::new(
                resting.client_id,
                release_asset,
                Decimal::ZERO,
                -resting_copy.reserved_limit_volume,
                now,
            ));
            resting_copy.reserved_limit_volume = Decimal::ZERO;
        }
    } else {
        resting_copy.remaining_volume = Volume::new(new_remaining);
        resting_copy.update_status(OrderStatus::Processing, now);
    }

    let trade = MatchedTrade {
        legs: vec![
            TradeLeg::new(
                ctx.pair.id.clone(),
                aggressor.client_id,
                base.clone(),
                market_rounded,
                resting.price,
                resting.id,
                resting.external_id.clone(),
                TradeRole::Taker,
                now,
            ),
            TradeLeg::new(
                ctx.pair.id.clone(),
                aggressor.client_id,
                quote.clone(),
                opposite_rounded,
                resting.price,
                resting.id,
                resting.external_id.clone(),
                TradeRole::Taker,
                now,
            ),
            TradeLeg::new(
                ctx.pair.id.clone(),
                resting.client_id,
                base.clone(),
                -market_rounded,
                resting.price,
                aggressor.order_id,
                aggressor.external_id,
                TradeRole::Maker,
                now,
            ),
            TradeLeg::new(
                ctx.pair.id.clone(),
                resting.client_id,
                quote.clone(),
                -opposite_rounded,
                resting.price,
                aggressor.order_id,
                aggressor.external_id,
                TradeRole::Maker,
                now,
            ),
        ],
        fee_transfers: maker_fees
            .transfers
            .into_iter()
            .chain(taker_fees.transfers)
            .collect(),
    };

    FillStep::Filled(Box::new(Fill {
        resting_copy,
        completed,
        own_operations,
        opposite_operations,
        trade,
    }))
}

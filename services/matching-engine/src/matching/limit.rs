//! Partial-fill tolerant limit-order matching
//!
//! Consumes the opposite side while the aggressor's limit price keeps
//! crossing the best resting price. Achieved fills commit; a non-zero
//! remainder rests in the book as `Processing`. Funds and fee failures on
//! the aggressor still reject the whole order with nothing committed.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;
use types::numeric::{round_half_up, scale_directed, Volume};
use types::order::{LimitOrder, OrderStatus};

use crate::book::BookEntry;
use crate::context::ExecutionContext;
use crate::fees::AvailableBalances;

use super::result::MatchingResult;
use super::{try_fill, Aggressor, FillStep, MatchContext};

/// Match an aggressing limit order against a copy of the opposite side.
///
/// Returns the mutated order copy and the result to commit or discard.
/// The caller rests the copy when its status is `InOrderBook`/`Processing`.
///
/// `available_balance` overrides the ledger read for the aggressor's
/// spending asset: a triggered stop order's own reserve already covers it,
/// so the caller adds that reserve back in.
pub fn match_limit_order(
    origin: &LimitOrder,
    opposite: &[BookEntry],
    ctx: &MatchContext<'_>,
    exec: &ExecutionContext,
    available_balance: Option<Decimal>,
) -> (LimitOrder, MatchingResult) {
    let mut order = origin.clone();
    let now = exec.timestamp;
    let is_buy = order.is_buy_side();
    let base_accuracy = ctx.base_asset.accuracy;
    let quote_accuracy = ctx.quote_asset.accuracy;
    let (spend_asset, spend_accuracy) = if is_buy {
        (&ctx.pair.quoting_asset_id, quote_accuracy)
    } else {
        (&ctx.pair.base_asset_id, base_accuracy)
    };

    let mut available = AvailableBalances::new();
    let initial_balance = match available_balance {
        Some(balance) => {
            available.set(order.client_id, spend_asset, balance);
            balance
        }
        None => available.get_or_load(ctx.ledger, order.client_id, spend_asset),
    };
    let mut market_balance = initial_balance;
    let mut maker_reserved = HashMap::new();

    let mut remaining = order.abs_remaining_volume();
    let mut total_volume = Decimal::ZERO;
    let mut total_limit_price = Decimal::ZERO;
    let mut matched_with_zero_latest = false;

    let mut result = MatchingResult::rejected(order.status, order.remaining_volume);

    let aggressor = Aggressor {
        client_id: order.client_id,
        order_id: order.id,
        external_id: &order.external_id,
        fees: &order.fees,
        is_buy,
    };

    for entry in opposite {
        if remaining.is_zero() || market_balance < Decimal::ZERO || matched_with_zero_latest {
            break;
        }
        // Limit orders only take while their own price crosses.
        let crosses = if is_buy {
            order.price >= entry.price
        } else {
            order.price <= entry.price
        };
        if !crosses {
            break;
        }
        let Some(resting) = ctx.registry.get(&entry.order_id) else {
            continue;
        };
        if resting.is_expired(now) {
            info!(order = %resting.external_id, "expired resting order set aside for cancellation");
            result.cancelled_order_ids.push(resting.id);
            continue;
        }
        // Self-trade exclusion by skip: restored untouched afterwards.
        if resting.client_id == order.client_id {
            result.skipped_order_ids.push(resting.id);
            continue;
        }

        let price = resting.price.as_decimal();
        let limit_remaining = resting.abs_remaining_volume();
        let (volume, is_fully_matched) = if remaining > limit_remaining {
            (limit_remaining, false)
        } else {
            (remaining, true)
        };

        let market_rounded =
            scale_directed(if is_buy { volume } else { -volume }, base_accuracy, !is_buy);
        let opposite_rounded = scale_directed(
            if is_buy { -price * volume } else { price * volume },
            quote_accuracy,
            is_buy,
        );

        let decisive_amount = if is_buy { market_rounded } else { opposite_rounded };
        if decisive_amount.is_zero() {
            if is_fully_matched {
                matched_with_zero_latest = true;
                result.skipped_order_ids.push(resting.id);
            } else {
                result.cancelled_order_ids.push(resting.id);
            }
            continue;
        }

        let fill = match try_fill(
            ctx,
            &aggressor,
            resting,
            market_rounded,
            opposite_rounded,
            &mut available,
            &mut maker_reserved,
            now,
        ) {
            FillStep::Filled(fill) => fill,
            FillStep::CancelResting => {
                result.cancelled_order_ids.push(resting.id);
                continue;
            }
            FillStep::Abort(status) => {
                order.update_status(status, now);
                return (
                    order,
                    MatchingResult::rejected_with_cancellations(
                        status,
                        origin.remaining_volume,
                        result.cancelled_order_ids,
                    ),
                );
            }
        };

        let spend = if is_buy {
            opposite_rounded.abs()
        } else {
            market_rounded.abs()
        };
        market_balance = round_half_up(market_balance - spend, spend_accuracy);
        available.set(order.client_id, spend_asset, market_balance);

        remaining = if is_fully_matched {
            Decimal::ZERO
        } else {
            scale_directed(remaining - market_rounded.abs(), base_accuracy, is_buy)
        };

        total_volume += volume;
        total_limit_price += volume * price;

        if fill.completed {
            result.completed_order_ids.push(fill.resting_copy.id);
        } else {
            result.uncompleted_order = Some(fill.resting_copy.clone());
        }
        result.matched_orders.push(fill.resting_copy);
        result.own_cash_movements.extend(fill.own_operations);
        result.opposite_cash_movements.extend(fill.opposite_operations);
        result.trades.push(fill.trade);
    }

    if matched_with_zero_latest {
        order.update_status(OrderStatus::InvalidVolume, now);
        return (
            order,
            MatchingResult::rejected_with_cancellations(
                OrderStatus::InvalidVolume,
                origin.remaining_volume,
                result.cancelled_order_ids,
            ),
        );
    }

    // The fills the walk accumulated must be coverable before anything
    // commits; partial-fill tolerance never tolerates uncovered fills.
    let total_spend = scale_directed(
        if is_buy { total_limit_price } else { total_volume },
        spend_accuracy,
        true,
    );
    if market_balance < Decimal::ZERO || initial_balance < total_spend {
        info!(
            order = %order.external_id,
            balance = %initial_balance,
            required = %total_spend,
            "not enough funds for limit order fills; nothing committed"
        );
        order.update_status(OrderStatus::NotEnoughFunds, now);
        return (
            order,
            MatchingResult::rejected_with_cancellations(
                OrderStatus::NotEnoughFunds,
                origin.remaining_volume,
                result.cancelled_order_ids,
            ),
        );
    }

    if remaining.is_zero() {
        order.remaining_volume = Volume::ZERO;
        order.update_status(OrderStatus::Matched, now);
    } else {
        let signed_remaining = if is_buy { remaining } else { -remaining };
        order.remaining_volume = Volume::new(signed_remaining);
        if result.has_fills() {
            order.update_status(OrderStatus::Processing, now);
        }
        // No fills at all: the order rests with its admission status.
    }

    result.status = order.status;
    result.remaining_volume = order.remaining_volume;
    (order, result)
}

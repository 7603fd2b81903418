//! All-or-nothing market-order matching
//!
//! Walks the opposite side best-first until the aggressor's volume is
//! satisfied. If the book runs dry, or the owner cannot cover the
//! accumulated notional, every touched order is restored untouched and the
//! order is rejected; no partial outcome exists for market orders.
//!
//! Volume conversion: a straight order is denominated in the base asset; a
//! non-straight order in the quoting asset, converted into base units at
//! each resting order's own price. Rounding residue from those chained
//! conversions is folded into the final leg instead of being left
//! permanently unmatched.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, info};
use types::numeric::{div_max_scale, round_half_up, scale_directed, Price, Volume};
use types::order::{MarketOrder, OrderStatus};

use crate::book::BookEntry;
use crate::context::ExecutionContext;
use crate::fees::AvailableBalances;

use super::result::MatchingResult;
use super::{try_fill, Aggressor, FillStep, MatchContext};

/// Match a market order against a copy of the opposite book side.
///
/// Returns the mutated order copy and the result to commit or discard.
pub fn match_market_order(
    origin: &MarketOrder,
    opposite: &[BookEntry],
    ctx: &MatchContext<'_>,
    exec: &ExecutionContext,
) -> (MarketOrder, MatchingResult) {
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
    let initial_balance = available.get_or_load(ctx.ledger, order.client_id, spend_asset);
    let mut market_balance = initial_balance;
    let mut maker_reserved = HashMap::new();

    let mut remaining = order.abs_volume();
    let mut total_volume = Decimal::ZERO;
    let mut total_limit_price = Decimal::ZERO;
    let mut total_limit_volume = Decimal::ZERO;
    let mut matched_with_zero_latest = false;

    let mut result = MatchingResult::rejected(order.status, order.volume);

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
        let market_remaining = if order.straight {
            remaining
        } else {
            match div_max_scale(remaining, price) {
                Some(converted) => converted,
                None => break,
            }
        };
        let (volume, is_fully_matched) = if market_remaining > limit_remaining {
            (limit_remaining, false)
        } else {
            (market_remaining, true)
        };

        let mut market_rounded =
            scale_directed(if is_buy { volume } else { -volume }, base_accuracy, !is_buy);
        let mut opposite_rounded = scale_directed(
            if is_buy { -price * volume } else { price * volume },
            quote_accuracy,
            is_buy,
        );

        // Final leg of a non-straight order: re-derive both movements from
        // the exact unfilled quote amount so the dust folds in here.
        if !order.straight && is_fully_matched {
            let sign = if order.volume.is_buy() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            opposite_rounded = sign
                * scale_directed(order.abs_volume() - total_limit_volume, quote_accuracy, is_buy);
            market_rounded = match div_max_scale(-opposite_rounded, price) {
                Some(base_volume) => scale_directed(base_volume, base_accuracy, !is_buy),
                None => break,
            };
            debug!(volume = %market_rounded, "rounded final matched leg");
        }

        let decisive_amount = if is_buy { market_rounded } else { opposite_rounded };
        if decisive_amount.is_zero() {
            if is_fully_matched {
                // The last sliver rounds to nothing; the order as a whole
                // cannot be represented at this accuracy.
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
                        origin.volume,
                        result.cancelled_order_ids,
                    ),
                );
            }
        };

        market_balance = round_half_up(
            market_balance - decisive_spend(is_buy, market_rounded, opposite_rounded),
            spend_accuracy,
        );
        available.set(order.client_id, spend_asset, market_balance);

        remaining = if is_fully_matched {
            Decimal::ZERO
        } else {
            let consumed = if order.straight {
                market_rounded.abs()
            } else {
                market_rounded.abs() * price
            };
            let denomination_accuracy = if order.straight {
                base_accuracy
            } else {
                quote_accuracy
            };
            scale_directed(
                remaining - consumed,
                denomination_accuracy,
                order.is_orig_buy_side(),
            )
        };

        total_volume += volume;
        total_limit_price += volume * price;
        total_limit_volume += if order.straight {
            market_rounded.abs()
        } else {
            opposite_rounded.abs()
        };

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

    if !remaining.is_zero() {
        let status = if matched_with_zero_latest {
            OrderStatus::InvalidVolume
        } else {
            OrderStatus::NoLiquidity
        };
        info!(
            order = %order.external_id,
            unfilled = %remaining,
            ?status,
            "market order not fully satisfied; nothing committed"
        );
        order.update_status(status, now);
        return (
            order,
            MatchingResult::rejected_with_cancellations(
                status,
                origin.volume,
                result.cancelled_order_ids,
            ),
        );
    }

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
            "not enough funds for market order; nothing committed"
        );
        order.update_status(OrderStatus::NotEnoughFunds, now);
        return (
            order,
            MatchingResult::rejected_with_cancellations(
                OrderStatus::NotEnoughFunds,
                origin.volume,
                result.cancelled_order_ids,
            ),
        );
    }

    let raw_price = if order.straight {
        div_max_scale(total_limit_price, order.abs_volume())
    } else {
        div_max_scale(order.abs_volume(), total_volume)
    };
    let execution_price = raw_price.map(|price| {
        Price::new(scale_directed(
            price,
            ctx.pair.accuracy,
            order.is_orig_buy_side(),
        ))
    });

    order.price = execution_price;
    order.update_status(OrderStatus::Matched, now);
    result.status = OrderStatus::Matched;
    result.execution_price = execution_price;
    result.remaining_volume = Volume::ZERO;
    (order, result)
}

/// What this fill took out of the aggressor's spending asset.
fn decisive_spend(is_buy: bool, market_rounded: Decimal, opposite_rounded: Decimal) -> Decimal {
    if is_buy {
        opposite_rounded.abs()
    } else {
        market_rounded.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::registry::OrderRegistry;
    use balance_ledger::events::balance_event_queues;
    use balance_ledger::BalanceLedger;
    use types::assets::{Asset, AssetPair, AssetsCache};
    use types::ids::{AssetId, AssetPairId, ClientId};
    use types::order::LimitOrder;
    use types::wallet::Wallet;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    struct Fixture {
        registry: OrderRegistry,
        ledger: BalanceLedger,
        assets: AssetsCache,
        pair: AssetPair,
        base: Asset,
        quote: Asset,
        book: OrderBook,
    }

    impl Fixture {
        fn new() -> Self {
            let assets = AssetsCache::new([Asset::new("BTC", 8), Asset::new("USD", 2)]);
            let (senders, _rx) = balance_event_queues();
            Self {
                registry: OrderRegistry::new(),
                ledger: BalanceLedger::new(assets.clone(), senders),
                assets,
                pair: AssetPair::new("BTCUSD", "BTC", "USD", 5),
                base: Asset::new("BTC", 8),
                quote: Asset::new("USD", 2),
                book: OrderBook::new(AssetPairId::new("BTCUSD")),
            }
        }

        fn seed(&mut self, client: ClientId, asset: &str, balance: &str, reserved: &str) {
            let mut wallet = Wallet::new(client);
            let entry = wallet.balance_entry_mut(&AssetId::new(asset));
            entry.balance = dec(balance);
            entry.reserved = dec(reserved);
            self.ledger.set_wallets([wallet]);
        }

        fn rest_sell(&mut self, client: ClientId, price: u64, volume: &str, created_at: i64) {
            let order = LimitOrder::new(
                format!("rest-{price}-{created_at}"),
                client,
                "BTCUSD",
                Price::from_u64(price),
                volume.parse().unwrap(),
                created_at,
            );
            self.book.add_order(&order);
            self.registry.insert(order);
        }

        fn ctx(&self) -> MatchContext<'_> {
            MatchContext {
                registry: &self.registry,
                ledger: &self.ledger,
                assets: &self.assets,
                pair: &self.pair,
                base_asset: &self.base,
                quote_asset: &self.quote,
            }
        }
    }

    fn market_buy(client: ClientId, volume: &str, straight: bool) -> MarketOrder {
        MarketOrder::new("mkt-1", client, "BTCUSD", volume.parse().unwrap(), straight, 10)
    }

    #[test]
    fn test_empty_book_is_no_liquidity() {
        let mut fixture = Fixture::new();
        let buyer = ClientId::new();
        fixture.seed(buyer, "USD", "1000", "0");

        let exec = ExecutionContext::new("msg", 10);
        let (order, result) =
            match_market_order(&market_buy(buyer, "0.1", true), &[], &fixture.ctx(), &exec);

        assert_eq!(order.status, OrderStatus::NoLiquidity);
        assert!(result.trades.is_empty());
        assert!(result.own_cash_movements.is_empty());
    }

    #[test]
    fn test_insufficient_depth_commits_nothing() {
        let mut fixture = Fixture::new();
        let maker = ClientId::new();
        let buyer = ClientId::new();
        fixture.seed(maker, "BTC", "0.05", "0.05");
        fixture.seed(buyer, "USD", "10000", "0");
        fixture.rest_sell(maker, 10_000, "-0.05", 1);

        let opposite = fixture.book.side_in_priority(false);
        let exec = ExecutionContext::new("msg", 10);
        let (order, result) =
            match_market_order(&market_buy(buyer, "0.1", true), &opposite, &fixture.ctx(), &exec);

        // Half the volume exists; all-or-nothing means zero fills commit.
        assert_eq!(order.status, OrderStatus::NoLiquidity);
        assert!(result.trades.is_empty());
        assert!(result.matched_orders.is_empty());
        assert!(result.own_cash_movements.is_empty());
        assert!(result.opposite_cash_movements.is_empty());
    }

    #[test]
    fn test_full_fill_across_levels_with_average_price() {
        let mut fixture = Fixture::new();
        let maker_a = ClientId::new();
        let maker_b = ClientId::new();
        let buyer = ClientId::new();
        fixture.seed(maker_a, "BTC", "0.1", "0.1");
        fixture.seed(maker_b, "BTC", "0.1", "0.1");
        fixture.seed(buyer, "USD", "10000", "0");
        fixture.rest_sell(maker_a, 10_000, "-0.1", 1);
        fixture.rest_sell(maker_b, 10_100, "-0.1", 2);

        let opposite = fixture.book.side_in_priority(false);
        let exec = ExecutionContext::new("msg", 10);
        let (order, result) =
            match_market_order(&market_buy(buyer, "0.2", true), &opposite, &fixture.ctx(), &exec);

        assert_eq!(order.status, OrderStatus::Matched);
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.completed_order_ids.len(), 2);
        // (0.1 * 10000 + 0.1 * 10100) / 0.2 = 10050
        assert_eq!(order.price, Some(Price::from_u64(10_050)));
    }

    #[test]
    fn test_non_straight_volume_converts_at_each_level() {
        let mut fixture = Fixture::new();
        let maker = ClientId::new();
        let buyer = ClientId::new();
        fixture.seed(maker, "BTC", "1", "1");
        fixture.seed(buyer, "USD", "1000", "0");
        fixture.rest_sell(maker, 10_000, "-1", 1);

        // Buy base with 1000 quote: volume sign refers to the quote asset.
        let opposite = fixture.book.side_in_priority(false);
        let exec = ExecutionContext::new("msg", 10);
        let (order, result) = match_market_order(
            &market_buy(buyer, "-1000", false),
            &opposite,
            &fixture.ctx(),
            &exec,
        );

        assert_eq!(order.status, OrderStatus::Matched);
        assert_eq!(result.trades.len(), 1);
        let legs = &result.trades[0].legs;
        // Aggressor receives exactly 0.1 base and pays exactly 1000 quote.
        assert_eq!(legs[0].volume, dec("0.1"));
        assert_eq!(legs[1].volume, dec("-1000"));
    }

    #[test]
    fn test_same_client_orders_are_skipped() {
        let mut fixture = Fixture::new();
        let client = ClientId::new();
        fixture.seed(client, "BTC", "0.1", "0.1");
        fixture.rest_sell(client, 10_000, "-0.1", 1);

        let opposite = fixture.book.side_in_priority(false);
        let exec = ExecutionContext::new("msg", 10);
        let (order, result) =
            match_market_order(&market_buy(client, "0.1", true), &opposite, &fixture.ctx(), &exec);

        assert_eq!(order.status, OrderStatus::NoLiquidity);
        assert_eq!(result.skipped_order_ids.len(), 1);
        assert!(result.cancelled_order_ids.is_empty());
    }

    #[test]
    fn test_underfunded_maker_set_aside_for_cancellation() {
        let mut fixture = Fixture::new();
        let broke_maker = ClientId::new();
        let good_maker = ClientId::new();
        let buyer = ClientId::new();
        fixture.seed(broke_maker, "BTC", "0", "0");
        fixture.seed(good_maker, "BTC", "0.1", "0.1");
        fixture.seed(buyer, "USD", "10100", "0");
        fixture.rest_sell(broke_maker, 10_000, "-0.1", 1);
        fixture.rest_sell(good_maker, 10_100, "-0.1", 2);

        let opposite = fixture.book.side_in_priority(false);
        let exec = ExecutionContext::new("msg", 10);
        let (order, result) =
            match_market_order(&market_buy(buyer, "0.1", true), &opposite, &fixture.ctx(), &exec);

        assert_eq!(order.status, OrderStatus::Matched);
        assert_eq!(result.cancelled_order_ids.len(), 1);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(order.price, Some(Price::from_u64(10_100)));
    }
}

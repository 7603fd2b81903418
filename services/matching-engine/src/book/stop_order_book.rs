//! Per-asset-pair stop order book
//!
//! Four priority indices, (lower, upper) trigger by (buy, sell) side, plus
//! one id map per side. An order carrying both bounds sits in both of its
//! side's indices and leaves them together. The head of each index is by
//! construction the best trigger candidate, so a non-qualifying head means
//! no order on that index qualifies.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use tracing::error;
use types::ids::{AssetPairId, OrderId};
use types::numeric::Price;
use types::order::LimitOrder;

// Lower triggers fire when the quote falls to the bound: highest bound
// first. Upper triggers fire when it rises: lowest bound first. The
// execution-price tiebreak favors the client on the opposite side, so its
// direction flips between sell and buy indices.
type LowerAskKey = (Reverse<Decimal>, Decimal, i64, OrderId);
type UpperAskKey = (Decimal, Decimal, i64, OrderId);
type LowerBidKey = (Reverse<Decimal>, Reverse<Decimal>, i64, OrderId);
type UpperBidKey = (Decimal, Reverse<Decimal>, i64, OrderId);

/// Stop order book for one asset pair.
#[derive(Debug, Clone)]
pub struct StopOrderBook {
    asset_pair_id: AssetPairId,
    lower_asks: BTreeMap<LowerAskKey, OrderId>,
    upper_asks: BTreeMap<UpperAskKey, OrderId>,
    lower_bids: BTreeMap<LowerBidKey, OrderId>,
    upper_bids: BTreeMap<UpperBidKey, OrderId>,
    ask_orders: HashMap<String, OrderId>,
    bid_orders: HashMap<String, OrderId>,
}

impl StopOrderBook {
    pub fn new(asset_pair_id: AssetPairId) -> Self {
        Self {
            asset_pair_id,
            lower_asks: BTreeMap::new(),
            upper_asks: BTreeMap::new(),
            lower_bids: BTreeMap::new(),
            upper_bids: BTreeMap::new(),
            ask_orders: HashMap::new(),
            bid_orders: HashMap::new(),
        }
    }

    pub fn asset_pair_id(&self) -> &AssetPairId {
        &self.asset_pair_id
    }

    /// Insert into the id map and every index the order's bounds require.
    pub fn add_order(&mut self, order: &LimitOrder) -> bool {
        if order.asset_pair_id != self.asset_pair_id {
            error!(
                order = %order.external_id,
                order_pair = %order.asset_pair_id,
                book_pair = %self.asset_pair_id,
                "unable to add stop order to foreign book"
            );
            return false;
        }
        let is_buy = order.is_buy_side();
        let id_map = if is_buy {
            &mut self.bid_orders
        } else {
            &mut self.ask_orders
        };
        id_map.insert(order.external_id.clone(), order.id);

        if let (Some(limit), Some(price)) = (order.lower_limit_price, order.lower_price) {
            if is_buy {
                self.lower_bids.insert(
                    (
                        Reverse(limit.as_decimal()),
                        Reverse(price.as_decimal()),
                        order.created_at,
                        order.id,
                    ),
                    order.id,
                );
            } else {
                self.lower_asks.insert(
                    (
                        Reverse(limit.as_decimal()),
                        price.as_decimal(),
                        order.created_at,
                        order.id,
                    ),
                    order.id,
                );
            }
        }
        if let (Some(limit), Some(price)) = (order.upper_limit_price, order.upper_price) {
            if is_buy {
                self.upper_bids.insert(
                    (
                        limit.as_decimal(),
                        Reverse(price.as_decimal()),
                        order.created_at,
                        order.id,
                    ),
                    order.id,
                );
            } else {
                self.upper_asks.insert(
                    (
                        limit.as_decimal(),
                        price.as_decimal(),
                        order.created_at,
                        order.id,
                    ),
                    order.id,
                );
            }
        }
        true
    }

    /// Remove from the id map and every index together. Idempotent.
    pub fn remove_order(&mut self, order: &LimitOrder) -> bool {
        if order.asset_pair_id != self.asset_pair_id {
            return false;
        }
        let is_buy = order.is_buy_side();
        let mut removed = if is_buy {
            self.bid_orders.remove(&order.external_id).is_some()
        } else {
            self.ask_orders.remove(&order.external_id).is_some()
        };

        if let (Some(limit), Some(price)) = (order.lower_limit_price, order.lower_price) {
            removed |= if is_buy {
                self.lower_bids
                    .remove(&(
                        Reverse(limit.as_decimal()),
                        Reverse(price.as_decimal()),
                        order.created_at,
                        order.id,
                    ))
                    .is_some()
            } else {
                self.lower_asks
                    .remove(&(
                        Reverse(limit.as_decimal()),
                        price.as_decimal(),
                        order.created_at,
                        order.id,
                    ))
                    .is_some()
            };
        }
        if let (Some(limit), Some(price)) = (order.upper_limit_price, order.upper_price) {
            removed |= if is_buy {
                self.upper_bids
                    .remove(&(
                        limit.as_decimal(),
                        Reverse(price.as_decimal()),
                        order.created_at,
                        order.id,
                    ))
                    .is_some()
            } else {
                self.upper_asks
                    .remove(&(
                        limit.as_decimal(),
                        price.as_decimal(),
                        order.created_at,
                        order.id,
                    ))
                    .is_some()
            };
        }
        removed
    }

    /// Head of the relevant index, only if its trigger is satisfied by
    /// `price`: lower bound fires at `lower_limit >= price`, upper bound at
    /// `upper_limit <= price`.
    pub fn get_order(&self, price: Price, is_buy: bool, is_lower: bool) -> Option<OrderId> {
        let quote = price.as_decimal();
        if is_lower {
            let (limit, id) = if is_buy {
                self.lower_bids.iter().next().map(|(k, v)| (k.0 .0, *v))?
            } else {
                self.lower_asks.iter().next().map(|(k, v)| (k.0 .0, *v))?
            };
            (limit >= quote).then_some(id)
        } else {
            let (limit, id) = if is_buy {
                self.upper_bids.iter().next().map(|(k, v)| (k.0, *v))?
            } else {
                self.upper_asks.iter().next().map(|(k, v)| (k.0, *v))?
            };
            (limit <= quote).then_some(id)
        }
    }

    pub fn get_order_id(&self, external_id: &str) -> Option<OrderId> {
        self.bid_orders
            .get(external_id)
            .or_else(|| self.ask_orders.get(external_id))
            .copied()
    }

    /// Ids of one side, in admission order (time-sortable ids).
    pub fn side_order_ids(&self, is_buy: bool) -> Vec<OrderId> {
        let map = if is_buy { &self.bid_orders } else { &self.ask_orders };
        let mut ids: Vec<OrderId> = map.values().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.ask_orders.is_empty() && self.bid_orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::ClientId;
    use types::numeric::Volume;

    fn stop_order(
        external_id: &str,
        volume: &str,
        lower: Option<(u64, u64)>,
        upper: Option<(u64, u64)>,
        created_at: i64,
    ) -> LimitOrder {
        LimitOrder::new_stop_limit(
            external_id,
            ClientId::new(),
            "BTCUSD",
            volume.parse::<Volume>().unwrap(),
            lower.map(|(l, p)| (Price::from_u64(l), Price::from_u64(p))),
            upper.map(|(l, p)| (Price::from_u64(l), Price::from_u64(p))),
            created_at,
        )
    }

    #[test]
    fn test_lower_trigger_qualification() {
        let mut book = StopOrderBook::new(AssetPairId::new("BTCUSD"));
        let order = stop_order("s1", "-1.0", Some((9_500, 9_400)), None, 1);
        book.add_order(&order);

        // Quote above the bound: head does not qualify.
        assert_eq!(book.get_order(Price::from_u64(9_501), false, true), None);
        // Quote at/below the bound: fires.
        assert_eq!(
            book.get_order(Price::from_u64(9_500), false, true),
            Some(order.id)
        );
        assert_eq!(
            book.get_order(Price::from_u64(9_000), false, true),
            Some(order.id)
        );
    }

    #[test]
    fn test_upper_trigger_qualification() {
        let mut book = StopOrderBook::new(AssetPairId::new("BTCUSD"));
        let order = stop_order("s1", "1.0", None, Some((10_500, 10_600)), 1);
        book.add_order(&order);

        assert_eq!(book.get_order(Price::from_u64(10_499), true, false), None);
        assert_eq!(
            book.get_order(Price::from_u64(10_500), true, false),
            Some(order.id)
        );
    }

    #[test]
    fn test_head_is_best_candidate() {
        let mut book = StopOrderBook::new(AssetPairId::new("BTCUSD"));
        let near = stop_order("near", "-1.0", Some((9_800, 9_700)), None, 2);
        let far = stop_order("far", "-1.0", Some((9_500, 9_400)), None, 1);
        book.add_order(&near);
        book.add_order(&far);

        // The higher lower-bound triggers first as the quote falls.
        assert_eq!(
            book.get_order(Price::from_u64(9_800), false, true),
            Some(near.id)
        );
        // Below both bounds the head is still the higher bound.
        assert_eq!(
            book.get_order(Price::from_u64(9_400), false, true),
            Some(near.id)
        );
    }

    #[test]
    fn test_both_bounds_removed_together() {
        let mut book = StopOrderBook::new(AssetPairId::new("BTCUSD"));
        let order = stop_order("s1", "-1.0", Some((9_500, 9_400)), Some((10_500, 10_600)), 1);
        book.add_order(&order);

        assert!(book.get_order(Price::from_u64(9_000), false, true).is_some());
        assert!(book.get_order(Price::from_u64(11_000), false, false).is_some());

        assert!(book.remove_order(&order));
        assert!(book.get_order(Price::from_u64(9_000), false, true).is_none());
        assert!(book.get_order(Price::from_u64(11_000), false, false).is_none());
        assert!(book.is_empty());
        assert!(!book.remove_order(&order), "second removal is a no-op");
    }

    #[test]
    fn test_foreign_pair_rejected() {
        let mut book = StopOrderBook::new(AssetPairId::new("ETHUSD"));
        let order = stop_order("s1", "-1.0", Some((9_500, 9_400)), None, 1);
        assert!(!book.add_order(&order));
        assert!(book.is_empty());
    }
}

//! Per-asset-pair limit order book
//!
//! Two priority structures: asks ordered by price ascending, bids by price
//! descending, ties broken by creation time (and the time-sortable order id
//! beyond that). BTreeMap keys keep iteration deterministic. The book holds
//! entries, not order records: the registry owns the single mutable record
//! per order, so book, id index and client index never disagree.
//!
//! Readers never iterate the live structures; they take a point-in-time
//! side copy (`side_in_priority`) or clone the whole book.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use types::ids::{AssetPairId, ClientId, OrderId};
use types::numeric::{div_max_scale, Price};
use types::order::LimitOrder;

type AskKey = (Decimal, i64, OrderId);
type BidKey = (Reverse<Decimal>, i64, OrderId);

/// What the book knows about a resting order.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub client_id: ClientId,
    pub price: Price,
    pub created_at: i64,
}

impl BookEntry {
    fn from_order(order: &LimitOrder) -> Self {
        Self {
            order_id: order.id,
            client_id: order.client_id,
            price: order.price,
            created_at: order.created_at,
        }
    }
}

/// Price-time priority order book for one asset pair.
#[derive(Debug, Clone)]
pub struct OrderBook {
    asset_pair_id: AssetPairId,
    asks: BTreeMap<AskKey, BookEntry>,
    bids: BTreeMap<BidKey, BookEntry>,
}

impl OrderBook {
    pub fn new(asset_pair_id: AssetPairId) -> Self {
        Self {
            asset_pair_id,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
        }
    }

    pub fn asset_pair_id(&self) -> &AssetPairId {
        &self.asset_pair_id
    }

    pub fn add_order(&mut self, order: &LimitOrder) {
        let entry = BookEntry::from_order(order);
        if order.is_buy_side() {
            self.bids.insert(
                (Reverse(order.price.as_decimal()), order.created_at, order.id),
                entry,
            );
        } else {
            self.asks
                .insert((order.price.as_decimal(), order.created_at, order.id), entry);
        }
    }

    /// Remove a resting order. Idempotent: absent orders are a no-op.
    pub fn remove_order(&mut self, order: &LimitOrder) -> bool {
        if order.is_buy_side() {
            self.bids
                .remove(&(Reverse(order.price.as_decimal()), order.created_at, order.id))
                .is_some()
        } else {
            self.asks
                .remove(&(order.price.as_decimal(), order.created_at, order.id))
                .is_some()
        }
    }

    /// Best ask, `Price::ZERO` when the side is empty.
    pub fn get_ask_price(&self) -> Price {
        self.asks
            .values()
            .next()
            .map(|entry| entry.price)
            .unwrap_or(Price::ZERO)
    }

    /// Best bid, `Price::ZERO` when the side is empty.
    pub fn get_bid_price(&self) -> Price {
        self.bids
            .values()
            .next()
            .map(|entry| entry.price)
            .unwrap_or(Price::ZERO)
    }

    pub fn get_best_price(&self, is_buy: bool) -> Price {
        if is_buy {
            self.get_bid_price()
        } else {
            self.get_ask_price()
        }
    }

    /// Midpoint of the touch, when both sides are quoted.
    pub fn get_mid_price(&self) -> Option<Price> {
        let ask = self.get_ask_price();
        let bid = self.get_bid_price();
        if ask.is_zero() || bid.is_zero() {
            return None;
        }
        div_max_scale(ask.as_decimal() + bid.as_decimal(), Decimal::TWO).map(Price::new)
    }

    /// True if admitting `order` would immediately cross the opposite best.
    pub fn lead_to_negative_spread(&self, order: &LimitOrder) -> bool {
        let best = self.get_best_price(!order.is_buy_side());
        if best.is_zero() {
            return false;
        }
        if order.is_buy_side() {
            order.price >= best
        } else {
            order.price <= best
        }
    }

    /// True if the crossing range contains one of the client's own orders.
    pub fn lead_to_negative_spread_for_client(&self, order: &LimitOrder) -> bool {
        self.walk_crossing(order, |entry| entry.client_id == order.client_id)
    }

    /// True if the crossing range contains a third party's order.
    pub fn lead_to_negative_spread_by_other_client(&self, order: &LimitOrder) -> bool {
        self.walk_crossing(order, |entry| entry.client_id != order.client_id)
    }

    /// Walk the opposite side from the best price while it keeps crossing,
    /// short-circuiting at the first non-crossing price.
    fn walk_crossing(&self, order: &LimitOrder, mut hit: impl FnMut(&BookEntry) -> bool) -> bool {
        let is_buy = order.is_buy_side();
        let opposite: Box<dyn Iterator<Item = &BookEntry>> = if is_buy {
            Box::new(self.asks.values())
        } else {
            Box::new(self.bids.values())
        };
        for entry in opposite {
            let crosses = if is_buy {
                order.price >= entry.price
            } else {
                order.price <= entry.price
            };
            if !crosses {
                break;
            }
            if hit(entry) {
                return true;
            }
        }
        false
    }

    /// Point-in-time copy of one side, best order first.
    pub fn side_in_priority(&self, is_buy: bool) -> Vec<BookEntry> {
        if is_buy {
            self.bids.values().cloned().collect()
        } else {
            self.asks.values().cloned().collect()
        }
    }

    pub fn side_len(&self, is_buy: bool) -> usize {
        if is_buy {
            self.bids.len()
        } else {
            self.asks.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::ClientId;

    fn order(client: ClientId, price: u64, volume: &str, created_at: i64) -> LimitOrder {
        LimitOrder::new(
            format!("ext-{price}-{created_at}"),
            client,
            "BTCUSD",
            Price::from_u64(price),
            volume.parse().unwrap(),
            created_at,
        )
    }

    #[test]
    fn test_empty_book_zero_sentinels() {
        let book = OrderBook::new(AssetPairId::new("BTCUSD"));
        assert_eq!(book.get_ask_price(), Price::ZERO);
        assert_eq!(book.get_bid_price(), Price::ZERO);
        assert!(book.get_mid_price().is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn test_best_prices() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        let client = ClientId::new();
        book.add_order(&order(client, 10_100, "-1.0", 1));
        book.add_order(&order(client, 10_200, "-1.0", 2));
        book.add_order(&order(client, 9_900, "1.0", 3));
        book.add_order(&order(client, 9_800, "1.0", 4));

        assert_eq!(book.get_ask_price(), Price::from_u64(10_100));
        assert_eq!(book.get_bid_price(), Price::from_u64(9_900));
        assert_eq!(book.get_mid_price(), Some(Price::from_u64(10_000)));
    }

    #[test]
    fn test_price_time_priority() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        let client = ClientId::new();
        let late = order(client, 10_000, "-1.0", 5);
        let early = order(client, 10_000, "-1.0", 1);
        let better = order(client, 9_900, "-1.0", 9);
        book.add_order(&late);
        book.add_order(&early);
        book.add_order(&better);

        let asks = book.side_in_priority(false);
        assert_eq!(asks[0].order_id, better.id, "better price first");
        assert_eq!(asks[1].order_id, early.id, "ties break by creation time");
        assert_eq!(asks[2].order_id, late.id);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        let resting = order(ClientId::new(), 10_000, "1.0", 1);
        book.add_order(&resting);

        assert!(book.remove_order(&resting));
        assert!(!book.remove_order(&resting), "second removal is a no-op");
        assert!(book.is_empty());
    }

    #[test]
    fn test_lead_to_negative_spread() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        book.add_order(&order(ClientId::new(), 10_000, "-1.0", 1));

        let crossing_buy = order(ClientId::new(), 10_000, "1.0", 2);
        let passive_buy = order(ClientId::new(), 9_999, "1.0", 3);
        assert!(book.lead_to_negative_spread(&crossing_buy));
        assert!(!book.lead_to_negative_spread(&passive_buy));
    }

    #[test]
    fn test_crossing_classification() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        let own = ClientId::new();
        let other = ClientId::new();
        book.add_order(&order(own, 10_000, "-1.0", 1));
        book.add_order(&order(other, 10_100, "-1.0", 2));

        // Crosses only the client's own best ask.
        let narrow = order(own, 10_050, "1.0", 3);
        assert!(book.lead_to_negative_spread_for_client(&narrow));
        assert!(!book.lead_to_negative_spread_by_other_client(&narrow));

        // Crosses both levels.
        let wide = order(own, 10_100, "1.0", 4);
        assert!(book.lead_to_negative_spread_for_client(&wide));
        assert!(book.lead_to_negative_spread_by_other_client(&wide));

        // Does not cross at all.
        let passive = order(own, 9_000, "1.0", 5);
        assert!(!book.lead_to_negative_spread_for_client(&passive));
        assert!(!book.lead_to_negative_spread_by_other_client(&passive));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Whatever the insertion order, each side reads back in strict
            // price-time priority.
            #[test]
            fn priority_holds_for_any_insertion_order(
                orders in prop::collection::vec((1u64..1_000, 1i64..1_000, any::<bool>()), 1..50)
            ) {
                let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
                let client = ClientId::new();
                for (price, created_at, is_buy) in &orders {
                    let volume = if *is_buy { "1.0" } else { "-1.0" };
                    book.add_order(&order(client, *price, volume, *created_at));
                }

                let asks = book.side_in_priority(false);
                for pair in asks.windows(2) {
                    prop_assert!(
                        pair[0].price < pair[1].price
                            || (pair[0].price == pair[1].price
                                && pair[0].created_at <= pair[1].created_at)
                    );
                }
                let bids = book.side_in_priority(true);
                for pair in bids.windows(2) {
                    prop_assert!(
                        pair[0].price > pair[1].price
                            || (pair[0].price == pair[1].price
                                && pair[0].created_at <= pair[1].created_at)
                    );
                }
            }
        }
    }

    #[test]
    fn test_side_copy_is_independent() {
        let mut book = OrderBook::new(AssetPairId::new("BTCUSD"));
        let resting = order(ClientId::new(), 10_000, "-1.0", 1);
        book.add_order(&resting);

        let snapshot = book.side_in_priority(false);
        book.remove_order(&resting);

        assert_eq!(snapshot.len(), 1, "snapshot unaffected by later mutation");
        assert_eq!(book.side_len(false), 0);
    }
}

//! Order lifecycle service
//!
//! Owns the per-pair limit and stop books and the registries behind them,
//! and keeps every index consistent through admission, cancellation,
//! eviction and stop-order triggering. Ledger mutation and the
//! persist-then-commit protocol live one level up in the engine; the one
//! exception is stop-order triggering, which persists the stop-book
//! removal before any in-memory state changes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, info};
use types::assets::AssetPair;
use types::ids::{AssetPairId, ClientId, OrderId};
use types::numeric::Price;
use types::order::{LimitOrder, OrderStatus};

use balance_ledger::BalanceLedger;
use persistence::{OrderBookSideSnapshot, PersistenceBatch, PersistenceManager};

use crate::book::{OrderBook, StopOrderBook};
use crate::events::{EngineEventSenders, QuoteUpdateEvent};
use crate::registry::OrderRegistry;

/// Best bid/ask of one pair, for market-profile snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrice {
    pub asset_pair_id: AssetPairId,
    pub ask: Price,
    pub bid: Price,
}

pub struct OrderLifecycleService {
    pub(crate) books: HashMap<AssetPairId, OrderBook>,
    pub(crate) stop_books: HashMap<AssetPairId, StopOrderBook>,
    pub(crate) registry: OrderRegistry,
    pub(crate) stop_registry: OrderRegistry,
    senders: EngineEventSenders,
}

impl OrderLifecycleService {
    pub fn new(senders: EngineEventSenders) -> Self {
        Self {
            books: HashMap::new(),
            stop_books: HashMap::new(),
            registry: OrderRegistry::new(),
            stop_registry: OrderRegistry::new(),
            senders,
        }
    }

    /// Repopulate books from the persistence backend at startup.
    pub fn load(&mut self, store: &dyn PersistenceManager) {
        let limit_orders = store.load_limit_orders();
        let stop_orders = store.load_stop_limit_orders();
        info!(
            limit_orders = limit_orders.len(),
            stop_orders = stop_orders.len(),
            "repopulating order books"
        );
        for order in limit_orders {
            self.add_to_order_book(order);
        }
        for order in stop_orders {
            self.add_stop_order(order);
        }
    }

    pub fn book(&self, pair: &AssetPairId) -> Option<&OrderBook> {
        self.books.get(pair)
    }

    pub fn book_mut(&mut self, pair: &AssetPairId) -> &mut OrderBook {
        self.books
            .entry(pair.clone())
            .or_insert_with(|| OrderBook::new(pair.clone()))
    }

    pub fn stop_book(&self, pair: &AssetPairId) -> Option<&StopOrderBook> {
        self.stop_books.get(pair)
    }

    pub fn stop_book_mut(&mut self, pair: &AssetPairId) -> &mut StopOrderBook {
        self.stop_books
            .entry(pair.clone())
            .or_insert_with(|| StopOrderBook::new(pair.clone()))
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub fn stop_registry(&self) -> &OrderRegistry {
        &self.stop_registry
    }

    /// Register a resting order: book, id index, client index, quote event.
    pub fn add_to_order_book(&mut self, order: LimitOrder) {
        let pair = order.asset_pair_id.clone();
        self.book_mut(&pair).add_order(&order);
        self.add_order(order);
    }

    /// Register without touching the book (the book was already updated,
    /// e.g. through a committed working copy).
    pub fn add_order(&mut self, order: LimitOrder) {
        let _ = self.senders.quotes.send(QuoteUpdateEvent {
            asset_pair_id: order.asset_pair_id.clone(),
            price: order.price,
            volume: order.volume,
        });
        self.registry.insert(order);
    }

    /// Admit an untriggered stop order into the stop book.
    pub fn add_stop_order(&mut self, order: LimitOrder) {
        let pair = order.asset_pair_id.clone();
        self.stop_book_mut(&pair).add_order(&order);
        self.stop_registry.insert(order);
    }

    /// Remove one live limit order from the book and every index.
    ///
    /// Idempotent: an unknown external id returns `None` (a cancel that
    /// lost the race against a match sees exactly this).
    pub fn remove_limit_order(&mut self, external_id: &str) -> Option<LimitOrder> {
        let order = self.registry.remove_by_external_id(external_id)?;
        if let Some(book) = self.books.get_mut(&order.asset_pair_id) {
            book.remove_order(&order);
        }
        debug!(order = external_id, "limit order removed from live indices");
        Some(order)
    }

    /// Remove one untriggered stop order from the stop book and indices.
    pub fn remove_stop_order(&mut self, external_id: &str) -> Option<LimitOrder> {
        let order = self.stop_registry.remove_by_external_id(external_id)?;
        if let Some(book) = self.stop_books.get_mut(&order.asset_pair_id) {
            book.remove_order(&order);
        }
        Some(order)
    }

    /// Evict fully matched orders from the live indices. Terminal orders
    /// are never retained in memory.
    pub fn move_orders_to_done(&mut self, order_ids: &[OrderId]) {
        for id in order_ids {
            if let Some(order) = self.registry.remove(id) {
                if let Some(book) = self.books.get_mut(&order.asset_pair_id) {
                    book.remove_order(&order);
                }
            }
        }
    }

    /// Live limit orders of one client, optionally narrowed to a pair and
    /// side. The cancel-and-replace flow cancels exactly this set.
    pub fn all_previous_orders(
        &self,
        client_id: &ClientId,
        pair: Option<&AssetPairId>,
        is_buy: Option<bool>,
    ) -> Vec<OrderId> {
        self.registry.client_orders(client_id, pair, is_buy)
    }

    pub fn all_previous_stop_orders(
        &self,
        client_id: &ClientId,
        pair: Option<&AssetPairId>,
        is_buy: Option<bool>,
    ) -> Vec<OrderId> {
        self.stop_registry.client_orders(client_id, pair, is_buy)
    }

    /// Available-balance check in the limiting asset before admission.
    pub fn is_enough_funds(
        &self,
        ledger: &BalanceLedger,
        pair: &AssetPair,
        order: &LimitOrder,
        volume: Decimal,
    ) -> bool {
        if order.is_buy_side() {
            let available = ledger.get_available_balance(&order.client_id, &pair.quoting_asset_id);
            debug!(
                client = %order.client_id,
                asset = %pair.quoting_asset_id,
                %available,
                required = %(volume * order.price.as_decimal()),
                "funds check"
            );
            available >= volume * order.price.as_decimal()
        } else {
            let available = ledger.get_available_balance(&order.client_id, &pair.base_asset_id);
            debug!(
                client = %order.client_id,
                asset = %pair.base_asset_id,
                %available,
                required = %volume,
                "funds check"
            );
            available >= volume
        }
    }

    /// Find and remove the single highest-priority triggered stop order,
    /// given the live book's current quotes.
    ///
    /// Sell stops trigger on the bid, buy stops on the ask; the lower
    /// index is consulted before the upper. The stop-book removal persists
    /// first: a persistence failure leaves the order untriggered. On
    /// success the order comes back converted to a resting limit order at
    /// its configured execution price, ready for the limit path.
    pub fn get_stop_order_for_process(
        &mut self,
        pair: &AssetPairId,
        store: &mut dyn PersistenceManager,
        now: i64,
    ) -> Option<LimitOrder> {
        let (bid, ask) = match self.books.get(pair) {
            Some(book) => (book.get_bid_price(), book.get_ask_price()),
            None => (Price::ZERO, Price::ZERO),
        };
        if let Some(order) = self.try_trigger(pair, bid, false, store, now) {
            return Some(order);
        }
        self.try_trigger(pair, ask, true, store, now)
    }

    fn try_trigger(
        &mut self,
        pair: &AssetPairId,
        quote: Price,
        is_buy: bool,
        store: &mut dyn PersistenceManager,
        now: i64,
    ) -> Option<LimitOrder> {
        if quote.is_zero() {
            return None;
        }
        let stop_book = self.stop_books.get(pair)?;
        let (order_id, execution_price) =
            match stop_book.get_order(quote, is_buy, true) {
                Some(id) => {
                    let order = self.stop_registry.get(&id)?;
                    (id, order.lower_price?)
                }
                None => {
                    let id = stop_book.get_order(quote, is_buy, false)?;
                    let order = self.stop_registry.get(&id)?;
                    (id, order.upper_price?)
                }
            };

        // Persist the stop book without the order before mutating anything.
        let order = self.stop_registry.get(&order_id)?.clone();
        let remaining_side: Vec<LimitOrder> = stop_book
            .side_order_ids(is_buy)
            .into_iter()
            .filter(|id| *id != order_id)
            .filter_map(|id| self.stop_registry.get(&id).cloned())
            .collect();
        let batch = PersistenceBatch {
            stop_order_books: vec![OrderBookSideSnapshot {
                asset_pair_id: pair.clone(),
                is_buy_side: is_buy,
                orders: remaining_side,
            }],
            completed_orders: vec![order.clone()],
            ..PersistenceBatch::default()
        };
        if !store.persist(&batch) {
            info!(order = %order.external_id, "unable to persist stop order trigger; left untriggered");
            return None;
        }

        self.stop_registry.remove(&order_id);
        if let Some(book) = self.stop_books.get_mut(pair) {
            book.remove_order(&order);
        }
        let mut triggered = order;
        triggered.price = execution_price;
        triggered.update_status(OrderStatus::InOrderBook, now);
        info!(
            order = %triggered.external_id,
            price = %triggered.price,
            "stop order triggered"
        );
        Some(triggered)
    }

    /// One side of one book as persistable, priority-ordered orders.
    ///
    /// `overrides` substitutes mutated copies that are not committed yet.
    pub fn side_snapshot(
        &self,
        book: &OrderBook,
        is_buy: bool,
        overrides: &HashMap<OrderId, LimitOrder>,
    ) -> OrderBookSideSnapshot {
        let orders = book
            .side_in_priority(is_buy)
            .into_iter()
            .filter_map(|entry| {
                overrides
                    .get(&entry.order_id)
                    .cloned()
                    .or_else(|| self.registry.get(&entry.order_id).cloned())
            })
            .collect();
        OrderBookSideSnapshot {
            asset_pair_id: book.asset_pair_id().clone(),
            is_buy_side: is_buy,
            orders,
        }
    }

    /// Best bid/ask per pair, over book copies.
    pub fn build_market_profile(&self) -> Vec<BestPrice> {
        let mut profile: Vec<BestPrice> = self
            .books
            .values()
            .filter_map(|book| {
                let ask = book.get_ask_price();
                let bid = book.get_bid_price();
                if ask.is_zero() && bid.is_zero() {
                    return None;
                }
                Some(BestPrice {
                    asset_pair_id: book.asset_pair_id().clone(),
                    ask,
                    bid,
                })
            })
            .collect();
        profile.sort_by(|a, b| a.asset_pair_id.cmp(&b.asset_pair_id));
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::engine_event_queues;
    use persistence::InMemoryPersistence;
    use types::numeric::Volume;

    fn service() -> (OrderLifecycleService, crate::events::EngineEventReceivers) {
        let (senders, receivers) = engine_event_queues();
        (OrderLifecycleService::new(senders), receivers)
    }

    fn limit_order(client: ClientId, external_id: &str, price: u64, volume: &str) -> LimitOrder {
        LimitOrder::new(
            external_id,
            client,
            "BTCUSD",
            Price::from_u64(price),
            volume.parse().unwrap(),
            1,
        )
    }

    fn stop_order(external_id: &str, volume: &str, lower: Option<(u64, u64)>, upper: Option<(u64, u64)>) -> LimitOrder {
        LimitOrder::new_stop_limit(
            external_id,
            ClientId::new(),
            "BTCUSD",
            volume.parse::<Volume>().unwrap(),
            lower.map(|(l, p)| (Price::from_u64(l), Price::from_u64(p))),
            upper.map(|(l, p)| (Price::from_u64(l), Price::from_u64(p))),
            1,
        )
    }

    #[test]
    fn test_admission_emits_quote_update() {
        let (mut service, receivers) = service();
        service.add_to_order_book(limit_order(ClientId::new(), "ext-1", 10_000, "1.0"));

        let quote = receivers.quotes.try_recv().unwrap();
        assert_eq!(quote.asset_pair_id, AssetPairId::new("BTCUSD"));
        assert_eq!(quote.price, Price::from_u64(10_000));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut service, _rx) = service();
        service.add_to_order_book(limit_order(ClientId::new(), "ext-1", 10_000, "1.0"));

        assert!(service.remove_limit_order("ext-1").is_some());
        assert!(service.remove_limit_order("ext-1").is_none(), "second cancel is a no-op");
        assert!(service.book(&AssetPairId::new("BTCUSD")).unwrap().is_empty());
    }

    #[test]
    fn test_move_orders_to_done_evicts() {
        let (mut service, _rx) = service();
        let order = limit_order(ClientId::new(), "ext-1", 10_000, "1.0");
        let id = order.id;
        service.add_to_order_book(order);

        service.move_orders_to_done(&[id]);
        assert!(service.registry().get(&id).is_none());
        assert!(service.book(&AssetPairId::new("BTCUSD")).unwrap().is_empty());
    }

    #[test]
    fn test_startup_load_repopulates() {
        let (mut service, _rx) = service();
        let store = InMemoryPersistence::new()
            .with_limit_orders(vec![limit_order(ClientId::new(), "ext-1", 10_000, "1.0")])
            .with_stop_limit_orders(vec![stop_order("s1", "-1.0", Some((9_500, 9_400)), None)]);

        service.load(&store);
        assert_eq!(service.registry().len(), 1);
        assert_eq!(service.stop_registry().len(), 1);
        assert!(!service.book(&AssetPairId::new("BTCUSD")).unwrap().is_empty());
    }

    #[test]
    fn test_stop_trigger_converts_to_limit_order() {
        let (mut service, _rx) = service();
        let mut store = InMemoryPersistence::new();
        let pair = AssetPairId::new("BTCUSD");

        // Resting bid at 9_499 sets the quote the sell stop watches.
        service.add_to_order_book(limit_order(ClientId::new(), "bid-1", 9_499, "1.0"));
        service.add_stop_order(stop_order("s1", "-1.0", Some((9_500, 9_400)), None));

        let triggered = service
            .get_stop_order_for_process(&pair, &mut store, 2)
            .expect("stop order should trigger");
        assert_eq!(triggered.price, Price::from_u64(9_400));
        assert_eq!(triggered.status, OrderStatus::InOrderBook);
        assert_eq!(service.stop_registry().len(), 0);

        // Nothing else to trigger.
        assert!(service.get_stop_order_for_process(&pair, &mut store, 3).is_none());
    }

    #[test]
    fn test_stop_trigger_requires_persistence() {
        let (mut service, _rx) = service();
        let mut store = InMemoryPersistence::new();
        let pair = AssetPairId::new("BTCUSD");
        service.add_to_order_book(limit_order(ClientId::new(), "bid-1", 9_499, "1.0"));
        service.add_stop_order(stop_order("s1", "-1.0", Some((9_500, 9_400)), None));

        store.fail_next(1);
        assert!(
            service.get_stop_order_for_process(&pair, &mut store, 2).is_none(),
            "trigger must not happen when the removal cannot be persisted"
        );
        // Order remains untriggered and still present.
        assert_eq!(service.stop_registry().len(), 1);
        assert!(service.get_stop_order_for_process(&pair, &mut store, 3).is_some());
    }

    #[test]
    fn test_untriggered_stop_does_not_fire() {
        let (mut service, _rx) = service();
        let mut store = InMemoryPersistence::new();
        let pair = AssetPairId::new("BTCUSD");
        service.add_to_order_book(limit_order(ClientId::new(), "bid-1", 9_501, "1.0"));
        service.add_stop_order(stop_order("s1", "-1.0", Some((9_500, 9_400)), None));

        assert!(service.get_stop_order_for_process(&pair, &mut store, 2).is_none());
        assert_eq!(service.stop_registry().len(), 1);
    }

    #[test]
    fn test_market_profile() {
        let (mut service, _rx) = service();
        service.add_to_order_book(limit_order(ClientId::new(), "a1", 10_100, "-1.0"));
        service.add_to_order_book(limit_order(ClientId::new(), "b1", 9_900, "1.0"));

        let profile = service.build_market_profile();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].ask, Price::from_u64(10_100));
        assert_eq!(profile[0].bid, Price::from_u64(9_900));
    }
}

//! End-to-end scenarios over the full engine: admission, matching, ledger
//! mutation and event emission against the in-memory persistence backend.

use rust_decimal::Decimal;

use balance_ledger::events::{balance_event_queues, BalanceEventReceivers};
use matching_engine::events::{engine_event_queues, EngineEventReceivers};
use matching_engine::{EngineConfig, ExecutionContext, TradingEngine};
use persistence::InMemoryPersistence;
use types::assets::{Asset, AssetPair, AssetPairsCache, AssetsCache};
use types::ids::{AssetId, AssetPairId, ClientId};
use types::numeric::{Price, Volume};
use types::order::{LimitOrder, MarketOrder, OrderStatus};
use types::wallet::Wallet;

fn dec(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

struct TestVenue {
    engine: TradingEngine<InMemoryPersistence>,
    engine_rx: EngineEventReceivers,
    balance_rx: BalanceEventReceivers,
    next_message: u64,
}

impl TestVenue {
    fn new() -> Self {
        let assets = AssetsCache::new([
            Asset::new("BTC", 8),
            Asset::new("USD", 2),
            Asset::new("EUR", 2),
        ]);
        let pairs = AssetPairsCache::new([
            AssetPair::new("BTCUSD", "BTC", "USD", 5),
            AssetPair::new("EURUSD", "EUR", "USD", 5),
        ]);
        let (engine_tx, engine_rx) = engine_event_queues();
        let (balance_tx, balance_rx) = balance_event_queues();
        let engine = TradingEngine::new(
            EngineConfig::default(),
            assets,
            pairs,
            InMemoryPersistence::new(),
            engine_tx,
            balance_tx,
        );
        Self {
            engine,
            engine_rx,
            balance_rx,
            next_message: 0,
        }
    }

    fn ctx(&mut self) -> ExecutionContext {
        self.next_message += 1;
        ExecutionContext::new(format!("msg-{}", self.next_message), self.next_message as i64)
    }

    fn seed(&mut self, client: ClientId, asset: &str, amount: &str) {
        let mut wallet = Wallet::new(client);
        wallet.balance_entry_mut(&AssetId::new(asset)).balance = dec(amount);
        self.engine.ledger_mut().set_wallets([wallet]);
    }

    fn seed_client(&mut self, balances: &[(&str, &str)]) -> ClientId {
        let client = ClientId::new();
        let mut wallet = Wallet::new(client);
        for (asset, amount) in balances {
            wallet.balance_entry_mut(&AssetId::new(*asset)).balance = dec(amount);
        }
        self.engine.ledger_mut().set_wallets([wallet]);
        client
    }

    fn balance(&self, client: &ClientId, asset: &str) -> Decimal {
        self.engine.ledger().get_balance(client, &AssetId::new(asset))
    }

    fn reserved(&self, client: &ClientId, asset: &str) -> Decimal {
        self.engine
            .ledger()
            .get_reserved_balance(client, &AssetId::new(asset))
    }

    fn limit_order(client: ClientId, external_id: &str, pair: &str, price: &str, volume: &str, now: i64) -> LimitOrder {
        LimitOrder::new(
            external_id,
            client,
            pair,
            price.parse::<Price>().unwrap(),
            volume.parse::<Volume>().unwrap(),
            now,
        )
    }
}

// ── Scenario A ──────────────────────────────────────────────────────

#[test]
fn market_buy_fills_resting_sell_completely() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "0.1")]);
    let buyer = venue.seed_client(&[("USD", "1000")]);

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::InOrderBook);
    assert_eq!(venue.reserved(&seller, "BTC"), dec("0.1"));

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-1", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 2),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::Matched);

    assert_eq!(venue.balance(&seller, "BTC"), Decimal::ZERO);
    assert_eq!(venue.balance(&seller, "USD"), dec("1000"));
    assert_eq!(venue.reserved(&seller, "BTC"), Decimal::ZERO);
    assert_eq!(venue.balance(&buyer, "BTC"), dec("0.1"));
    assert_eq!(venue.balance(&buyer, "USD"), Decimal::ZERO);

    // The resting order is fully matched and evicted from the live set.
    let pair = AssetPairId::new("BTCUSD");
    assert!(venue.engine.lifecycle().registry().get_by_external_id("sell-1").is_none());
    assert!(venue.engine.lifecycle().book(&pair).unwrap().is_empty());
}

// ── Scenario B ──────────────────────────────────────────────────────

#[test]
fn partial_fill_leaves_resting_order_processing() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("EUR", "1.0")]);
    let buyer = venue.seed_client(&[("USD", "10")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "EURUSD", "1.2", "-1.0", 1),
        )
        .unwrap();

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(buyer, "buy-1", "EURUSD", "1.2", "0.5", 2),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::Matched);

    let resting = venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("sell-1")
        .expect("partially filled order stays live");
    assert_eq!(resting.status, OrderStatus::Processing);
    assert_eq!(resting.remaining_volume, "-0.5".parse().unwrap());
    assert_eq!(resting.price, "1.2".parse().unwrap());

    // Still quoted at the same price.
    let pair = AssetPairId::new("EURUSD");
    let book = venue.engine.lifecycle().book(&pair).unwrap();
    assert_eq!(book.get_ask_price(), "1.2".parse().unwrap());
}

// ── Scenario C ──────────────────────────────────────────────────────

#[test]
fn unknown_asset_pair_rejects_without_any_effect() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("USD", "1000")]);

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "buy-1", "XXXYYY", "10", "1.0", 1),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::UnknownAsset);

    // Zero queue events, zero ledger mutation, zero persistence calls.
    assert!(venue.engine_rx.executions.try_recv().is_err());
    assert!(venue.engine_rx.quotes.try_recv().is_err());
    assert!(venue.balance_rx.updates.try_recv().is_err());
    assert_eq!(venue.balance(&client, "USD"), dec("1000"));
    assert_eq!(venue.engine.store_mut().persist_calls(), 0);
}

// ── Scenario D ──────────────────────────────────────────────────────

#[test]
fn cash_out_beyond_available_rejects_with_zero_mutation() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("USD", "100")]);

    // Reserve 50 by resting an order.
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "buy-1", "BTCUSD", "500", "0.1", 1),
        )
        .unwrap();
    assert_eq!(venue.reserved(&client, "USD"), dec("50.00"));

    let mut ctx = venue.ctx();
    let result = venue
        .engine
        .cash_in_out(&mut ctx, &client, &AssetId::new("USD"), dec("-60"));
    assert!(result.is_err(), "only 50 of 100 is available");
    assert_eq!(venue.balance(&client, "USD"), dec("100"));
    assert_eq!(venue.reserved(&client, "USD"), dec("50.00"));

    // Within the available part it passes.
    let mut ctx = venue.ctx();
    venue
        .engine
        .cash_in_out(&mut ctx, &client, &AssetId::new("USD"), dec("-50"))
        .unwrap();
    assert_eq!(venue.balance(&client, "USD"), dec("50.00"));
}

// ── Scenario E ──────────────────────────────────────────────────────

#[test]
fn stop_order_triggers_when_bid_falls_and_matches_in_same_pass() {
    let mut venue = TestVenue::new();
    let bidder_high = venue.seed_client(&[("USD", "1000")]);
    let bidder_low = venue.seed_client(&[("USD", "1000")]);
    let stop_seller = venue.seed_client(&[("BTC", "0.1")]);
    let market_seller = venue.seed_client(&[("BTC", "0.1")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(bidder_high, "bid-high", "BTCUSD", "9501", "0.1", 1),
        )
        .unwrap();
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(bidder_low, "bid-low", "BTCUSD", "9499", "0.1", 2),
        )
        .unwrap();

    // Sell stop: triggers when the bid falls to 9500, then sells at 9400.
    let stop = LimitOrder::new_stop_limit(
        "stop-1",
        stop_seller,
        "BTCUSD",
        "-0.1".parse::<Volume>().unwrap(),
        Some(("9500".parse().unwrap(), "9400".parse().unwrap())),
        None,
        3,
    );
    let mut ctx = venue.ctx();
    let status = venue.engine.submit_limit_order(&mut ctx, stop).unwrap();
    assert_eq!(status, OrderStatus::Pending, "bid 9501 is above the trigger");
    assert_eq!(venue.engine.lifecycle().stop_registry().len(), 1);

    // A trade consumes the 9501 bid; the touch falls to 9499.
    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("mkt-1", market_seller, "BTCUSD", "-0.1".parse().unwrap(), true, 4),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::Matched);

    // The stop order triggered in the same pass and, with its execution
    // price of 9400 crossing the 9499 bid, matched immediately.
    assert_eq!(venue.engine.lifecycle().stop_registry().len(), 0);
    assert!(venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("stop-1")
        .is_none());
    assert_eq!(venue.balance(&stop_seller, "BTC"), Decimal::ZERO);
    assert_eq!(venue.balance(&stop_seller, "USD"), dec("949.90"));
    assert_eq!(venue.reserved(&stop_seller, "BTC"), Decimal::ZERO);
    assert_eq!(venue.balance(&bidder_low, "BTC"), dec("0.1"));
}

// ── Price-time priority ─────────────────────────────────────────────

#[test]
fn better_price_then_earlier_time_matches_first() {
    let mut venue = TestVenue::new();
    let seller_late = venue.seed_client(&[("BTC", "1")]);
    let seller_early = venue.seed_client(&[("BTC", "1")]);
    let seller_worse = venue.seed_client(&[("BTC", "1")]);
    let buyer = venue.seed_client(&[("USD", "100000")]);

    // Same price, different times; plus a worse-priced order.
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller_late, "late", "BTCUSD", "10000", "-0.1", 5),
        )
        .unwrap();
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller_early, "early", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller_worse, "worse", "BTCUSD", "10100", "-0.1", 2),
        )
        .unwrap();

    // Takes exactly two of the three.
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("mkt-1", buyer, "BTCUSD", "0.2".parse().unwrap(), true, 6),
        )
        .unwrap();

    let registry = venue.engine.lifecycle().registry();
    assert!(registry.get_by_external_id("early").is_none(), "earlier order fills first");
    assert!(registry.get_by_external_id("late").is_none(), "same price fills by time");
    assert!(registry.get_by_external_id("worse").is_some(), "worse price left resting");
    // Both fills executed at the makers' price.
    assert_eq!(venue.balance(&buyer, "USD"), dec("98000"));
}

// ── Conservation ────────────────────────────────────────────────────

#[test]
fn committed_match_legs_net_to_zero() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "1")]);
    let buyer = venue.seed_client(&[("USD", "10000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.37", 1),
        )
        .unwrap();
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("mkt-1", buyer, "BTCUSD", "0.37".parse().unwrap(), true, 2),
        )
        .unwrap();

    // Drain events until the market-order execution report appears.
    let mut event = None;
    while let Ok(candidate) = venue.engine_rx.executions.try_recv() {
        if candidate.market_order.is_some() {
            event = Some(candidate);
        }
    }
    let event = event.expect("execution event for the market order");
    let trades = &event.market_order.unwrap().trades;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].legs.len(), 4);
    assert_eq!(trades[0].net_volume(&AssetId::new("BTC")), Decimal::ZERO);
    assert_eq!(trades[0].net_volume(&AssetId::new("USD")), Decimal::ZERO);
}

// ── No partial mutation on persistence failure ──────────────────────

#[test]
fn persistence_failure_leaves_everything_untouched() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "0.1")]);
    let buyer = venue.seed_client(&[("USD", "1000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();
    let reserved_before = venue.reserved(&seller, "BTC");

    venue.engine.store_mut().fail_next(1);
    let mut ctx = venue.ctx();
    let result = venue.engine.submit_market_order(
        &mut ctx,
        MarketOrder::new("buy-1", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 2),
    );
    assert!(result.is_err(), "persistence failure surfaces as a runtime failure");

    // Book, registry and balances exactly as before the call.
    let pair = AssetPairId::new("BTCUSD");
    assert!(venue.engine.lifecycle().registry().get_by_external_id("sell-1").is_some());
    assert!(!venue.engine.lifecycle().book(&pair).unwrap().is_empty());
    assert_eq!(venue.balance(&seller, "BTC"), dec("0.1"));
    assert_eq!(venue.reserved(&seller, "BTC"), reserved_before);
    assert_eq!(venue.balance(&buyer, "USD"), dec("1000"));
    assert_eq!(venue.balance(&buyer, "BTC"), Decimal::ZERO);

    // The same order succeeds once persistence recovers.
    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-2", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 3),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::Matched);
}

// ── Idempotent cancel ───────────────────────────────────────────────

#[test]
fn cancelling_twice_reports_not_found_second_time() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("BTC", "1")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "sell-1", "BTCUSD", "10000", "-0.5", 1),
        )
        .unwrap();
    assert_eq!(venue.reserved(&client, "BTC"), dec("0.5"));

    let mut ctx = venue.ctx();
    let first = venue.engine.cancel_limit_order(&mut ctx, "sell-1").unwrap();
    assert_eq!(first, Some(OrderStatus::Cancelled));
    assert_eq!(venue.reserved(&client, "BTC"), Decimal::ZERO);

    let mut ctx = venue.ctx();
    let second = venue.engine.cancel_limit_order(&mut ctx, "sell-1").unwrap();
    assert_eq!(second, None, "second cancel is a no-op");
    assert_eq!(venue.balance(&client, "BTC"), dec("1"));
}

// ── Self-trade exclusion ────────────────────────────────────────────

#[test]
fn market_order_skips_own_resting_orders() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("BTC", "1"), ("USD", "10000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-1", client, "BTCUSD", "0.1".parse().unwrap(), true, 2),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::NoLiquidity, "own orders provide no liquidity");

    // Both sides untouched.
    let resting = venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("sell-1")
        .unwrap();
    assert_eq!(resting.status, OrderStatus::InOrderBook);
    assert_eq!(resting.remaining_volume, "-0.1".parse().unwrap());
    assert_eq!(venue.balance(&client, "BTC"), dec("1"));
    assert_eq!(venue.balance(&client, "USD"), dec("10000"));
}

#[test]
fn limit_order_crossing_own_order_rejected_as_negative_spread() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("BTC", "1"), ("USD", "10000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(client, "buy-1", "BTCUSD", "10000", "0.1", 2),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::LeadToNegativeSpread);
    assert!(venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("buy-1")
        .is_none());
}

// ── Funds checks ────────────────────────────────────────────────────

#[test]
fn market_order_without_funds_commits_nothing() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "0.1")]);
    let buyer = venue.seed_client(&[("USD", "500")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();

    // Needs 1000 USD, has 500.
    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-1", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 2),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::NotEnoughFunds);
    assert_eq!(venue.balance(&buyer, "USD"), dec("500"));
    assert_eq!(venue.balance(&seller, "BTC"), dec("0.1"));
    assert!(venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("sell-1")
        .is_some());
}

#[test]
fn resting_order_with_spent_reserve_is_cancelled_not_matched() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "0.1")]);
    let other_seller = venue.seed_client(&[("BTC", "0.1")]);
    let buyer = venue.seed_client(&[("USD", "2000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(other_seller, "sell-2", "BTCUSD", "10000", "-0.1", 2),
        )
        .unwrap();

    // The first seller's funds disappear underneath its reserve
    // (tolerated legacy path: the ledger applies what it is told).
    venue.seed(seller, "BTC", "0");

    let mut ctx = venue.ctx();
    let status = venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-1", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 3),
        )
        .unwrap();
    assert_eq!(status, OrderStatus::Matched);

    // The defaulting order was set aside and cancelled; the second one filled.
    assert!(venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("sell-1")
        .is_none());
    assert!(venue
        .engine
        .lifecycle()
        .registry()
        .get_by_external_id("sell-2")
        .is_none());
    assert_eq!(venue.balance(&other_seller, "USD"), dec("1000"));
    assert_eq!(venue.balance(&buyer, "BTC"), dec("0.1"));
}

// ── Mass cancel and cancel-and-replace ──────────────────────────────

#[test]
fn mass_cancel_clears_client_orders_on_pair_and_side() {
    let mut venue = TestVenue::new();
    let client = venue.seed_client(&[("BTC", "10"), ("USD", "100000")]);
    let other = venue.seed_client(&[("BTC", "10")]);

    for (ext, price, volume, t) in [
        ("s1", "10000", "-0.1", 1i64),
        ("s2", "10100", "-0.1", 2),
        ("b1", "9000", "0.1", 3),
    ] {
        let mut ctx = venue.ctx();
        venue
            .engine
            .submit_limit_order(
                &mut ctx,
                TestVenue::limit_order(client, ext, "BTCUSD", price, volume, t),
            )
            .unwrap();
    }
    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(other, "other-1", "BTCUSD", "10200", "-0.1", 4),
        )
        .unwrap();

    let pair = AssetPairId::new("BTCUSD");
    let mut ctx = venue.ctx();
    let cancelled = venue
        .engine
        .mass_cancel(&mut ctx, &client, Some(&pair), Some(false))
        .unwrap();
    assert_eq!(cancelled, 2, "only the client's sells on the pair");

    let registry = venue.engine.lifecycle().registry();
    assert!(registry.get_by_external_id("s1").is_none());
    assert!(registry.get_by_external_id("s2").is_none());
    assert!(registry.get_by_external_id("b1").is_some());
    assert!(registry.get_by_external_id("other-1").is_some());
    assert_eq!(venue.reserved(&client, "BTC"), Decimal::ZERO);
}

#[test]
fn multi_order_replaces_previous_set_atomically() {
    let mut venue = TestVenue::new();
    let maker = venue.seed_client(&[("USD", "10000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(maker, "old-1", "BTCUSD", "9000", "0.5", 1),
        )
        .unwrap();
    assert_eq!(venue.reserved(&maker, "USD"), dec("4500.00"));

    let pair = AssetPairId::new("BTCUSD");
    let mut ctx = venue.ctx();
    let statuses = venue
        .engine
        .multi_limit_order(
            &mut ctx,
            &maker,
            &pair,
            vec![
                TestVenue::limit_order(maker, "new-1", "BTCUSD", "9100", "0.5", 2),
                TestVenue::limit_order(maker, "new-2", "BTCUSD", "0", "0.5", 2),
            ],
        )
        .unwrap();

    assert_eq!(statuses[0], ("new-1".to_string(), OrderStatus::InOrderBook));
    assert_eq!(statuses[1].1, OrderStatus::InvalidPrice, "bad entry rejected alone");

    let registry = venue.engine.lifecycle().registry();
    assert!(registry.get_by_external_id("old-1").is_none(), "previous set cancelled");
    assert!(registry.get_by_external_id("new-1").is_some());
    assert_eq!(venue.reserved(&maker, "USD"), dec("4550.00"));
}

// ── Balance events ──────────────────────────────────────────────────

#[test]
fn committed_match_emits_balance_updates_per_client() {
    let mut venue = TestVenue::new();
    let seller = venue.seed_client(&[("BTC", "0.1")]);
    let buyer = venue.seed_client(&[("USD", "1000")]);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_limit_order(
            &mut ctx,
            TestVenue::limit_order(seller, "sell-1", "BTCUSD", "10000", "-0.1", 1),
        )
        .unwrap();
    // Admission reserves: one notification for the seller.
    assert_eq!(venue.balance_rx.notifications.try_recv().unwrap().client_id, seller);

    let mut ctx = venue.ctx();
    venue
        .engine
        .submit_market_order(
            &mut ctx,
            MarketOrder::new("buy-1", buyer, "BTCUSD", "0.1".parse().unwrap(), true, 2),
        )
        .unwrap();

    let mut notified = Vec::new();
    while let Ok(notification) = venue.balance_rx.notifications.try_recv() {
        notified.push(notification.client_id);
    }
    assert!(notified.contains(&seller));
    assert!(notified.contains(&buyer));

    let update = venue.balance_rx.updates.try_recv().unwrap();
    assert!(!update.balances.is_empty());
}

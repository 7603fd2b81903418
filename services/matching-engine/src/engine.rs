//! Trading engine
//!
//! The single-active-mutator entry layer: admission validation, the two
//! matching paths, cancellation flows and stop-order draining. Every
//! request follows the same discipline: compute against working copies,
//! persist one batch through the ledger, and only on success swap the
//! working state in and emit events. A persistence failure therefore
//! leaves books, registries and balances exactly as they were.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;
use types::assets::{AssetPair, AssetPairsCache, AssetsCache};
use types::errors::{BalanceError, EngineError};
use types::ids::{AssetId, AssetPairId, ClientId, OrderId};
use types::numeric::{fits_scale, scale_directed};
use types::order::{LimitOrder, MarketOrder, OrderStatus, OrderType};
use types::wallet::WalletOperation;

use balance_ledger::{BalanceEventSenders, BalanceLedger};
use persistence::{OrderBookSideSnapshot, PersistenceBatch, PersistenceManager};

use crate::book::OrderBook;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::events::{EngineEventSenders, ExecutionEvent, MarketOrderReport};
use crate::lifecycle::OrderLifecycleService;
use crate::matching::{match_limit_order, match_market_order, MatchContext, MatchingResult};

pub struct TradingEngine<P: PersistenceManager> {
    config: EngineConfig,
    assets: AssetsCache,
    pairs: AssetPairsCache,
    lifecycle: OrderLifecycleService,
    ledger: BalanceLedger,
    store: P,
    senders: EngineEventSenders,
    sequence_number: u64,
}

impl<P: PersistenceManager> TradingEngine<P> {
    pub fn new(
        config: EngineConfig,
        assets: AssetsCache,
        pairs: AssetPairsCache,
        store: P,
        engine_senders: EngineEventSenders,
        balance_senders: BalanceEventSenders,
    ) -> Self {
        let ledger = BalanceLedger::new(assets.clone(), balance_senders);
        let lifecycle = OrderLifecycleService::new(engine_senders.clone());
        Self {
            config,
            assets,
            pairs,
            lifecycle,
            ledger,
            store,
            senders: engine_senders,
            sequence_number: 0,
        }
    }

    /// Repopulate books from the persistence backend at startup.
    pub fn load(&mut self) {
        self.lifecycle.load(&self.store);
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut BalanceLedger {
        &mut self.ledger
    }

    pub fn lifecycle(&self) -> &OrderLifecycleService {
        &self.lifecycle
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    // ── Submission services ─────────────────────────────────────────

    /// Admit one limit or stop-limit order.
    pub fn submit_limit_order(
        &mut self,
        ctx: &mut ExecutionContext,
        order: LimitOrder,
    ) -> Result<OrderStatus, EngineError> {
        let Some(pair) = self.pairs.get(&order.asset_pair_id).cloned() else {
            return Ok(self.reject_limit_order(ctx, order, OrderStatus::UnknownAsset));
        };
        if let Some(status) = self.validate_limit_order(&pair, &order) {
            return Ok(self.reject_limit_order(ctx, order, status));
        }

        if order.order_type == OrderType::StopLimit {
            return self.admit_stop_order(ctx, pair, order);
        }

        // Crossing the client's own resting order is rejected outright.
        let self_cross = self
            .lifecycle
            .book(&order.asset_pair_id)
            .map(|book| book.lead_to_negative_spread_for_client(&order))
            .unwrap_or(false);
        if self_cross {
            info!(order = %order.external_id, "order leads to negative spread");
            return Ok(self.reject_limit_order(ctx, order, OrderStatus::LeadToNegativeSpread));
        }
        if !self
            .lifecycle
            .is_enough_funds(&self.ledger, &pair, &order, order.abs_volume())
        {
            return Ok(self.reject_limit_order(ctx, order, OrderStatus::NotEnoughFunds));
        }

        let status = self.match_or_rest_limit_order(ctx, &pair, order, Decimal::ZERO, None)?;
        self.process_stop_orders(ctx, &pair.id)?;
        Ok(status)
    }

    /// Execute one market order, all-or-nothing.
    pub fn submit_market_order(
        &mut self,
        ctx: &mut ExecutionContext,
        order: MarketOrder,
    ) -> Result<OrderStatus, EngineError> {
        let now = ctx.timestamp;
        let Some(pair) = self.pairs.get(&order.asset_pair_id).cloned() else {
            return Ok(self.reject_market_order(ctx, order, OrderStatus::UnknownAsset));
        };
        if let Some(status) = self.validate_market_order(&pair, &order) {
            return Ok(self.reject_market_order(ctx, order, status));
        }
        let (Some(base_asset), Some(quote_asset)) = (
            self.assets.get(&pair.base_asset_id).cloned(),
            self.assets.get(&pair.quoting_asset_id).cloned(),
        ) else {
            return Ok(self.reject_market_order(ctx, order, OrderStatus::UnknownAsset));
        };

        let opposite = self
            .lifecycle
            .book(&pair.id)
            .map(|book| book.side_in_priority(!order.is_buy_side()))
            .unwrap_or_default();

        let (order_copy, result) = {
            let match_ctx = MatchContext {
                registry: self.lifecycle.registry(),
                ledger: &self.ledger,
                assets: &self.assets,
                pair: &pair,
                base_asset: &base_asset,
                quote_asset: &quote_asset,
            };
            match_market_order(&order, &opposite, &match_ctx, ctx)
        };

        if order_copy.status != OrderStatus::Matched {
            self.commit_cancellations(ctx, &result.cancelled_order_ids, &[])?;
            let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
            event.market_order = Some(MarketOrderReport {
                order: order_copy.clone(),
                trades: Vec::new(),
            });
            let _ = self.senders.executions.send(event);
            return Ok(order_copy.status);
        }

        self.commit_match(ctx, &pair, &result, None, Decimal::ZERO, Vec::new())?;
        let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
        event.market_order = Some(MarketOrderReport {
            order: order_copy,
            trades: result.trades.clone(),
        });
        for matched in &result.matched_orders {
            event.add_limit_order(matched.clone(), Vec::new());
        }
        let _ = self.senders.executions.send(event);

        self.process_stop_orders(ctx, &pair.id)?;
        Ok(OrderStatus::Matched)
    }

    /// Cancel one live order by its client-assigned id. Idempotent: an
    /// unknown id reports "not found" as `Ok(None)`.
    pub fn cancel_limit_order(
        &mut self,
        ctx: &mut ExecutionContext,
        external_id: &str,
    ) -> Result<Option<OrderStatus>, EngineError> {
        if let Some((id, pair_id)) = self
            .lifecycle
            .registry()
            .get_by_external_id(external_id)
            .map(|order| (order.id, order.asset_pair_id.clone()))
        {
            self.commit_cancellations(ctx, &[id], &[])?;
            // The cancel may have moved the touch past a stop trigger.
            self.process_stop_orders(ctx, &pair_id)?;
            return Ok(Some(OrderStatus::Cancelled));
        }
        if let Some(id) = self
            .lifecycle
            .stop_registry()
            .get_by_external_id(external_id)
            .map(|order| order.id)
        {
            self.commit_cancellations(ctx, &[], &[id])?;
            return Ok(Some(OrderStatus::Cancelled));
        }
        info!(order = external_id, "unable to cancel: missing or already processed");
        Ok(None)
    }

    /// Cancel every live order of a client, optionally narrowed to one
    /// pair and side. Limit and stop orders cancel together in one batch.
    pub fn mass_cancel(
        &mut self,
        ctx: &mut ExecutionContext,
        client_id: &ClientId,
        pair: Option<&AssetPairId>,
        is_buy: Option<bool>,
    ) -> Result<usize, EngineError> {
        let limit_ids = self.lifecycle.all_previous_orders(client_id, pair, is_buy);
        let stop_ids = self.lifecycle.all_previous_stop_orders(client_id, pair, is_buy);
        if limit_ids.is_empty() && stop_ids.is_empty() {
            return Ok(0);
        }
        let mut touched_pairs: Vec<AssetPairId> = limit_ids
            .iter()
            .filter_map(|id| {
                self.lifecycle
                    .registry()
                    .get(id)
                    .map(|order| order.asset_pair_id.clone())
            })
            .collect();
        touched_pairs.sort();
        touched_pairs.dedup();

        self.commit_cancellations(ctx, &limit_ids, &stop_ids)?;
        // The cancels may have moved a touch past a stop trigger.
        for pair_id in touched_pairs {
            self.process_stop_orders(ctx, &pair_id)?;
        }
        Ok(limit_ids.len() + stop_ids.len())
    }

    /// Cancel-and-replace: drop the client's previous orders on the sides
    /// the new set uses, then admit the new set. Entries are validated
    /// individually; an invalid entry is rejected without harming the
    /// rest. Replacement orders that would cross are rejected with
    /// `LeadToNegativeSpread` rather than matched, which keeps the whole
    /// request one atomic batch.
    pub fn multi_limit_order(
        &mut self,
        ctx: &mut ExecutionContext,
        client_id: &ClientId,
        pair_id: &AssetPairId,
        orders: Vec<LimitOrder>,
    ) -> Result<Vec<(String, OrderStatus)>, EngineError> {
        let now = ctx.timestamp;
        let pair = match self.pairs.get(pair_id).cloned() {
            Some(pair)
                if self.assets.get(&pair.base_asset_id).is_some()
                    && self.assets.get(&pair.quoting_asset_id).is_some() =>
            {
                pair
            }
            _ => {
                return Ok(orders
                    .iter()
                    .map(|o| (o.external_id.clone(), OrderStatus::UnknownAsset))
                    .collect());
            }
        };
        let quote_accuracy = self.assets.accuracy(&pair.quoting_asset_id).unwrap_or(0);

        let mut sides: Vec<bool> = orders.iter().map(|o| o.is_buy_side()).collect();
        sides.sort();
        sides.dedup();
        let mut cancel_ids = Vec::new();
        for side in sides {
            cancel_ids.extend(
                self.lifecycle
                    .all_previous_orders(client_id, Some(pair_id), Some(side)),
            );
        }

        let mut work_book = self.lifecycle.book_mut(pair_id).clone();
        let mut operations: Vec<WalletOperation> = Vec::new();
        let mut completed_records = Vec::new();
        // Funds freed by the cancellations count toward the new orders.
        let mut released: HashMap<AssetId, Decimal> = HashMap::new();

        for id in &cancel_ids {
            let Some(order) = self.lifecycle.registry().get(id).cloned() else {
                continue;
            };
            work_book.remove_order(&order);
            let released_reserve = order.reserved_limit_volume;
            let asset = limit_asset(&pair, &order);
            completed_records.push(cancel_record(&mut operations, &pair, order, now));
            *released.entry(asset).or_default() += released_reserve;
        }

        let mut statuses = Vec::with_capacity(orders.len());
        let mut admitted: Vec<LimitOrder> = Vec::new();
        let mut overrides: HashMap<OrderId, LimitOrder> = HashMap::new();
        let mut reserved_new: HashMap<AssetId, Decimal> = HashMap::new();

        for mut order in orders {
            if let Some(status) = self.validate_limit_order(&pair, &order) {
                statuses.push((order.external_id.clone(), status));
                continue;
            }
            if work_book.lead_to_negative_spread(&order) {
                statuses.push((order.external_id.clone(), OrderStatus::LeadToNegativeSpread));
                continue;
            }
            let asset = limit_asset(&pair, &order);
            let reserve = if order.is_buy_side() {
                scale_directed(
                    order.abs_volume() * order.price.as_decimal(),
                    quote_accuracy,
                    true,
                )
            } else {
                order.abs_volume()
            };
            let already_reserved = reserved_new.get(&asset).copied().unwrap_or_default();
            let available = self.ledger.get_available_balance(client_id, &asset)
                + released.get(&asset).copied().unwrap_or_default()
                - already_reserved;
            if available < reserve {
                statuses.push((order.external_id.clone(), OrderStatus::NotEnoughFunds));
                continue;
            }
            reserved_new.insert(asset.clone(), already_reserved + reserve);
            order.reserved_limit_volume = reserve;
            operations.push(WalletOperation::new(
                *client_id,
                asset,
                Decimal::ZERO,
                reserve,
                now,
            ));
            work_book.add_order(&order);
            overrides.insert(order.id, order.clone());
            statuses.push((order.external_id.clone(), OrderStatus::InOrderBook));
            admitted.push(order);
        }

        let snapshots = vec![
            self.lifecycle.side_snapshot(&work_book, true, &overrides),
            self.lifecycle.side_snapshot(&work_book, false, &overrides),
        ];
        let batch = PersistenceBatch {
            order_books: snapshots.clone(),
            completed_orders: completed_records,
            sequence_number: Some(self.sequence_number + 1),
            ..PersistenceBatch::default()
        };
        self.ledger
            .process_wallet_operations(&ctx.message_id, now, &operations, batch, &mut self.store)
            .map_err(EngineError::Balance)?;
        self.sequence_number += 1;

        for snapshot in snapshots {
            self.store.update_order_book(snapshot);
        }
        *self.lifecycle.book_mut(pair_id) = work_book;
        for id in &cancel_ids {
            self.lifecycle.registry.remove(id);
        }
        let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
        for order in admitted {
            event.add_limit_order(order.clone(), Vec::new());
            self.lifecycle.add_order(order);
        }
        let _ = self.senders.executions.send(event);

        self.process_stop_orders(ctx, pair_id)?;
        Ok(statuses)
    }

    /// Cash in (positive) or out (negative). A cash-out must be covered by
    /// the available (unreserved) balance; otherwise it is rejected with
    /// zero mutation.
    pub fn cash_in_out(
        &mut self,
        ctx: &mut ExecutionContext,
        client_id: &ClientId,
        asset_id: &AssetId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if self.assets.get(asset_id).is_none() {
            return Err(EngineError::UnknownAsset(asset_id.clone()));
        }
        if amount < Decimal::ZERO {
            let available = self.ledger.get_available_balance(client_id, asset_id);
            if available < amount.abs() {
                return Err(EngineError::Balance(BalanceError::NotEnoughFunds {
                    asset: asset_id.clone(),
                    required: amount.abs().to_string(),
                    available: available.to_string(),
                }));
            }
        }
        let operation = WalletOperation::new(
            *client_id,
            asset_id.clone(),
            amount,
            Decimal::ZERO,
            ctx.timestamp,
        );
        let batch = PersistenceBatch::default().with_sequence_number(self.sequence_number + 1);
        self.ledger
            .process_wallet_operations(
                &ctx.message_id,
                ctx.timestamp,
                &[operation],
                batch,
                &mut self.store,
            )
            .map_err(EngineError::Balance)?;
        self.sequence_number += 1;
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────

    fn validate_limit_order(&self, pair: &AssetPair, order: &LimitOrder) -> Option<OrderStatus> {
        let Some(base_accuracy) = self.assets.accuracy(&pair.base_asset_id) else {
            return Some(OrderStatus::UnknownAsset);
        };
        if self.assets.accuracy(&pair.quoting_asset_id).is_none() {
            return Some(OrderStatus::UnknownAsset);
        }

        if order.order_type == OrderType::StopLimit {
            let lower_valid = matches!(
                (order.lower_limit_price, order.lower_price),
                (Some(limit), Some(price)) if !limit.is_zero() && !price.is_zero()
            );
            let upper_valid = matches!(
                (order.upper_limit_price, order.upper_price),
                (Some(limit), Some(price)) if !limit.is_zero() && !price.is_zero()
            );
            let lower_missing = order.lower_limit_price.is_none() && order.lower_price.is_none();
            let upper_missing = order.upper_limit_price.is_none() && order.upper_price.is_none();
            if !(lower_valid || upper_valid)
                || (!lower_valid && !lower_missing)
                || (!upper_valid && !upper_missing)
            {
                return Some(OrderStatus::InvalidPrice);
            }
        } else if order.price.is_zero() || !fits_scale(order.price.as_decimal(), pair.accuracy) {
            return Some(OrderStatus::InvalidPrice);
        }

        if order.volume.is_zero() || !fits_scale(order.volume.as_decimal(), base_accuracy) {
            return Some(OrderStatus::InvalidVolume);
        }
        if order.fees.iter().any(|fee| fee.validate().is_err()) {
            return Some(OrderStatus::InvalidFee);
        }
        if let Some(max) = self.config.max_order_book_size {
            let side_len = self
                .lifecycle
                .book(&pair.id)
                .map(|book| book.side_len(order.is_buy_side()))
                .unwrap_or(0);
            if side_len >= max {
                return Some(OrderStatus::OrderBookMaxSizeReached);
            }
        }
        None
    }

    fn validate_market_order(&self, pair: &AssetPair, order: &MarketOrder) -> Option<OrderStatus> {
        let Some(base_accuracy) = self.assets.accuracy(&pair.base_asset_id) else {
            return Some(OrderStatus::UnknownAsset);
        };
        let Some(quote_accuracy) = self.assets.accuracy(&pair.quoting_asset_id) else {
            return Some(OrderStatus::UnknownAsset);
        };
        let accuracy = if order.straight {
            base_accuracy
        } else {
            quote_accuracy
        };
        if order.volume.is_zero() || !fits_scale(order.volume.as_decimal(), accuracy) {
            return Some(OrderStatus::InvalidVolume);
        }
        if order.fees.iter().any(|fee| fee.validate().is_err()) {
            return Some(OrderStatus::InvalidFee);
        }
        None
    }

    // ── Matching commit protocol ────────────────────────────────────

    /// Match an admitted limit order and commit, or rest it.
    /// `previous_reserved` carries a triggered stop order's existing
    /// reserve so only the delta moves; `available_balance` overrides the
    /// ledger read for the same reason.
    fn match_or_rest_limit_order(
        &mut self,
        ctx: &mut ExecutionContext,
        pair: &AssetPair,
        order: LimitOrder,
        previous_reserved: Decimal,
        available_balance: Option<Decimal>,
    ) -> Result<OrderStatus, EngineError> {
        let now = ctx.timestamp;
        let (Some(base_asset), Some(quote_asset)) = (
            self.assets.get(&pair.base_asset_id).cloned(),
            self.assets.get(&pair.quoting_asset_id).cloned(),
        ) else {
            return Ok(self.reject_limit_order(ctx, order, OrderStatus::UnknownAsset));
        };

        let opposite = self
            .lifecycle
            .book(&pair.id)
            .map(|book| book.side_in_priority(!order.is_buy_side()))
            .unwrap_or_default();

        let (order_copy, result) = {
            let match_ctx = MatchContext {
                registry: self.lifecycle.registry(),
                ledger: &self.ledger,
                assets: &self.assets,
                pair,
                base_asset: &base_asset,
                quote_asset: &quote_asset,
            };
            match_limit_order(&order, &opposite, &match_ctx, ctx, available_balance)
        };

        if order_copy.status.is_terminal() && order_copy.status != OrderStatus::Matched {
            // The aggressor commits nothing, but orders set aside for
            // cancellation during the walk still leave the book.
            self.commit_cancellations(ctx, &result.cancelled_order_ids, &[])?;
            let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
            event.add_limit_order(order_copy.clone(), Vec::new());
            let _ = self.senders.executions.send(event);
            return Ok(order_copy.status);
        }

        let rests = !order_copy.status.is_terminal();
        let rest_copy = if rests { Some(order_copy.clone()) } else { None };
        let mut extra_operations = Vec::new();
        if !rests && previous_reserved > Decimal::ZERO {
            // A triggered stop order that matched in full releases its
            // admission reserve.
            extra_operations.push(WalletOperation::new(
                order_copy.client_id,
                limit_asset(pair, &order_copy),
                Decimal::ZERO,
                -previous_reserved,
                now,
            ));
        }
        self.commit_match(ctx, pair, &result, rest_copy, previous_reserved, extra_operations)?;

        let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
        event.add_limit_order(order_copy.clone(), result.trades.clone());
        for matched in &result.matched_orders {
            event.add_limit_order(matched.clone(), Vec::new());
        }
        let _ = self.senders.executions.send(event);
        Ok(order_copy.status)
    }

    /// Commit a successful match: apply removals and the resting remainder
    /// to a working book, persist balances + snapshots in one batch, then
    /// swap the working state in.
    fn commit_match(
        &mut self,
        ctx: &ExecutionContext,
        pair: &AssetPair,
        result: &MatchingResult,
        rest_order: Option<LimitOrder>,
        previous_reserved: Decimal,
        extra_operations: Vec<WalletOperation>,
    ) -> Result<(), EngineError> {
        let now = ctx.timestamp;
        let mut work_book = self.lifecycle.book_mut(&pair.id).clone();
        let mut operations = result.all_cash_movements();
        operations.extend(extra_operations);
        let mut completed_records: Vec<LimitOrder> = Vec::new();
        let mut overrides: HashMap<OrderId, LimitOrder> = HashMap::new();

        for copy in &result.matched_orders {
            overrides.insert(copy.id, copy.clone());
        }
        for id in &result.completed_order_ids {
            if let Some(order) = self.lifecycle.registry().get(id) {
                work_book.remove_order(order);
            }
            if let Some(copy) = overrides.get(id) {
                completed_records.push(copy.clone());
            }
        }
        for id in &result.cancelled_order_ids {
            if let Some(order) = self.lifecycle.registry().get(id).cloned() {
                work_book.remove_order(&order);
                completed_records.push(cancel_record(&mut operations, pair, order, now));
            }
        }

        let mut rest_record = None;
        if let Some(mut resting) = rest_order {
            let asset = limit_asset(pair, &resting);
            let accuracy = self.assets.accuracy(&asset).unwrap_or(0);
            let reserve = if resting.is_buy_side() {
                scale_directed(
                    resting.abs_remaining_volume() * resting.price.as_decimal(),
                    accuracy,
                    true,
                )
            } else {
                resting.abs_remaining_volume()
            };
            if reserve != previous_reserved {
                operations.push(WalletOperation::new(
                    resting.client_id,
                    asset,
                    Decimal::ZERO,
                    reserve - previous_reserved,
                    now,
                ));
            }
            resting.reserved_limit_volume = reserve;
            work_book.add_order(&resting);
            overrides.insert(resting.id, resting.clone());
            rest_record = Some(resting);
        }

        let snapshots = vec![
            self.lifecycle.side_snapshot(&work_book, true, &overrides),
            self.lifecycle.side_snapshot(&work_book, false, &overrides),
        ];
        let batch = PersistenceBatch {
            order_books: snapshots.clone(),
            completed_orders: completed_records,
            sequence_number: Some(self.sequence_number + 1),
            ..PersistenceBatch::default()
        };

        self.ledger
            .process_wallet_operations(&ctx.message_id, now, &operations, batch, &mut self.store)
            .map_err(EngineError::Balance)?;
        self.sequence_number += 1;

        // Persisted; now the in-memory state may move.
        for snapshot in snapshots {
            self.store.update_order_book(snapshot);
        }
        *self.lifecycle.book_mut(&pair.id) = work_book;
        if let Some(uncompleted) = &result.uncompleted_order {
            self.lifecycle.registry.apply(uncompleted.clone());
        }
        for id in &result.completed_order_ids {
            self.lifecycle.registry.remove(id);
        }
        for id in &result.cancelled_order_ids {
            self.lifecycle.registry.remove(id);
        }
        if let Some(resting) = rest_record {
            self.lifecycle.add_order(resting);
        }
        Ok(())
    }

    /// One atomic batch cancelling limit and stop orders across any number
    /// of pairs: working book copies, reserve releases, snapshots, one
    /// persist, then the swap.
    fn commit_cancellations(
        &mut self,
        ctx: &ExecutionContext,
        limit_ids: &[OrderId],
        stop_ids: &[OrderId],
    ) -> Result<(), EngineError> {
        if limit_ids.is_empty() && stop_ids.is_empty() {
            return Ok(());
        }
        let now = ctx.timestamp;
        let mut work_books: HashMap<AssetPairId, OrderBook> = HashMap::new();
        let mut stop_sides: HashMap<(AssetPairId, bool), Vec<OrderId>> = HashMap::new();
        let mut operations = Vec::new();
        let mut completed_records = Vec::new();

        for id in limit_ids {
            let Some(order) = self.lifecycle.registry().get(id).cloned() else {
                continue;
            };
            let Some(pair) = self.pairs.get(&order.asset_pair_id).cloned() else {
                continue;
            };
            let book = work_books
                .entry(order.asset_pair_id.clone())
                .or_insert_with(|| {
                    self.lifecycle
                        .book(&order.asset_pair_id)
                        .cloned()
                        .unwrap_or_else(|| OrderBook::new(order.asset_pair_id.clone()))
                });
            book.remove_order(&order);
            completed_records.push(cancel_record(&mut operations, &pair, order, now));
        }

        for id in stop_ids {
            let Some(order) = self.lifecycle.stop_registry().get(id).cloned() else {
                continue;
            };
            let Some(pair) = self.pairs.get(&order.asset_pair_id).cloned() else {
                continue;
            };
            stop_sides
                .entry((order.asset_pair_id.clone(), order.is_buy_side()))
                .or_default()
                .push(order.id);
            completed_records.push(cancel_record(&mut operations, &pair, order, now));
        }

        let empty_overrides = HashMap::new();
        let mut order_books = Vec::new();
        for book in work_books.values() {
            order_books.push(self.lifecycle.side_snapshot(book, true, &empty_overrides));
            order_books.push(self.lifecycle.side_snapshot(book, false, &empty_overrides));
        }
        let mut stop_order_books = Vec::new();
        for ((pair_id, is_buy), removed) in &stop_sides {
            let Some(stop_book) = self.lifecycle.stop_book(pair_id) else {
                continue;
            };
            let orders = stop_book
                .side_order_ids(*is_buy)
                .into_iter()
                .filter(|id| !removed.contains(id))
                .filter_map(|id| self.lifecycle.stop_registry().get(&id).cloned())
                .collect();
            stop_order_books.push(OrderBookSideSnapshot {
                asset_pair_id: pair_id.clone(),
                is_buy_side: *is_buy,
                orders,
            });
        }

        let batch = PersistenceBatch {
            order_books: order_books.clone(),
            stop_order_books,
            completed_orders: completed_records.clone(),
            sequence_number: Some(self.sequence_number + 1),
            ..PersistenceBatch::default()
        };
        self.ledger
            .process_wallet_operations(&ctx.message_id, now, &operations, batch, &mut self.store)
            .map_err(EngineError::Balance)?;
        self.sequence_number += 1;

        for snapshot in order_books {
            self.store.update_order_book(snapshot);
        }
        for (pair_id, book) in work_books {
            *self.lifecycle.book_mut(&pair_id) = book;
        }
        for id in limit_ids {
            self.lifecycle.registry.remove(id);
        }
        for id in stop_ids {
            if let Some(order) = self.lifecycle.stop_registry.remove(id) {
                if let Some(book) = self.lifecycle.stop_books.get_mut(&order.asset_pair_id) {
                    book.remove_order(&order);
                }
            }
        }

        let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
        for record in completed_records {
            event.add_limit_order(record, Vec::new());
        }
        let _ = self.senders.executions.send(event);
        Ok(())
    }

    // ── Stop order admission and draining ───────────────────────────

    fn admit_stop_order(
        &mut self,
        ctx: &mut ExecutionContext,
        pair: AssetPair,
        mut order: LimitOrder,
    ) -> Result<OrderStatus, EngineError> {
        let now = ctx.timestamp;
        // Reserve against the worst execution price among the bounds.
        let asset = limit_asset(&pair, &order);
        let accuracy = self.assets.accuracy(&asset).unwrap_or(0);
        let reserve = if order.is_buy_side() {
            let worst_price = [order.lower_price, order.upper_price]
                .into_iter()
                .flatten()
                .map(|price| price.as_decimal())
                .fold(Decimal::ZERO, Decimal::max);
            scale_directed(order.abs_volume() * worst_price, accuracy, true)
        } else {
            order.abs_volume()
        };
        let available = self.ledger.get_available_balance(&order.client_id, &asset);
        if available < reserve {
            return Ok(self.reject_limit_order(ctx, order, OrderStatus::NotEnoughFunds));
        }
        order.reserved_limit_volume = reserve;

        let operations = vec![WalletOperation::new(
            order.client_id,
            asset,
            Decimal::ZERO,
            reserve,
            now,
        )];
        let side_orders: Vec<LimitOrder> = self
            .lifecycle
            .stop_book(&pair.id)
            .map(|book| {
                book.side_order_ids(order.is_buy_side())
                    .into_iter()
                    .filter_map(|id| self.lifecycle.stop_registry().get(&id).cloned())
                    .chain(std::iter::once(order.clone()))
                    .collect()
            })
            .unwrap_or_else(|| vec![order.clone()]);
        let batch = PersistenceBatch {
            stop_order_books: vec![OrderBookSideSnapshot {
                asset_pair_id: pair.id.clone(),
                is_buy_side: order.is_buy_side(),
                orders: side_orders,
            }],
            sequence_number: Some(self.sequence_number + 1),
            ..PersistenceBatch::default()
        };
        self.ledger
            .process_wallet_operations(&ctx.message_id, now, &operations, batch, &mut self.store)
            .map_err(EngineError::Balance)?;
        self.sequence_number += 1;

        let mut event = ExecutionEvent::new(ctx.message_id.clone(), now);
        event.add_limit_order(order.clone(), Vec::new());
        let _ = self.senders.executions.send(event);
        self.lifecycle.add_stop_order(order);

        // The quote may already satisfy the trigger.
        self.process_stop_orders(ctx, &pair.id)?;
        Ok(OrderStatus::Pending)
    }

    /// Drain triggered stop orders one at a time, feeding each through the
    /// limit path so it may match in the same pass.
    fn process_stop_orders(
        &mut self,
        ctx: &mut ExecutionContext,
        pair_id: &AssetPairId,
    ) -> Result<(), EngineError> {
        loop {
            let Some(triggered) = self.lifecycle.get_stop_order_for_process(
                pair_id,
                &mut self.store,
                ctx.timestamp,
            ) else {
                return Ok(());
            };
            let Some(pair) = self.pairs.get(pair_id).cloned() else {
                return Ok(());
            };
            // The order's own reserve backs it: count it as available.
            let previous_reserved = triggered.reserved_limit_volume;
            let spend_asset = limit_asset(&pair, &triggered);
            let available = self
                .ledger
                .get_available_balance(&triggered.client_id, &spend_asset)
                + previous_reserved;
            self.match_or_rest_limit_order(
                ctx,
                &pair,
                triggered,
                previous_reserved,
                Some(available),
            )?;
        }
    }

    // ── Rejection reporting ─────────────────────────────────────────

    // Pre-admission rejections answer the client synchronously through
    // the returned status; nothing reaches the outbound queues and
    // nothing in the book or ledger moves.

    fn reject_limit_order(
        &mut self,
        _ctx: &ExecutionContext,
        order: LimitOrder,
        status: OrderStatus,
    ) -> OrderStatus {
        info!(order = %order.external_id, ?status, "limit order rejected");
        status
    }

    fn reject_market_order(
        &mut self,
        ctx: &ExecutionContext,
        mut order: MarketOrder,
        status: OrderStatus,
    ) -> OrderStatus {
        info!(order = %order.external_id, ?status, "market order rejected");
        order.update_status(status, ctx.timestamp);
        status
    }
}

/// The asset a resting order's reserve is held in.
fn limit_asset(pair: &AssetPair, order: &LimitOrder) -> AssetId {
    if order.is_buy_side() {
        pair.quoting_asset_id.clone()
    } else {
        pair.base_asset_id.clone()
    }
}

/// Turn a live order into its cancelled record, releasing its reserve.
fn cancel_record(
    operations: &mut Vec<WalletOperation>,
    pair: &AssetPair,
    mut order: LimitOrder,
    now: i64,
) -> LimitOrder {
    if order.reserved_limit_volume > Decimal::ZERO {
        operations.push(WalletOperation::new(
            order.client_id,
            limit_asset(pair, &order),
            Decimal::ZERO,
            -order.reserved_limit_volume,
            now,
        ));
        order.reserved_limit_volume = Decimal::ZERO;
    }
    order.update_status(OrderStatus::Cancelled, now);
    order
}

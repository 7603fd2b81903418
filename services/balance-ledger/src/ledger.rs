//! The balance ledger
//!
//! In-memory wallet map with persist-then-commit mutation. Wallet records
//! are created lazily on first touch and live for the process lifetime.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use types::assets::AssetsCache;
use types::errors::BalanceError;
use types::ids::{AssetId, ClientId};
use types::numeric::round_half_up;
use types::wallet::{ClientBalanceUpdate, Wallet, WalletOperation};

use persistence::{AssetBalanceSnapshot, PersistenceBatch, PersistenceManager};

use crate::events::{BalanceEventSenders, BalanceUpdateEvent, BalanceUpdateNotification};

/// Per-(client, asset) balance store mutated only through operation batches.
pub struct BalanceLedger {
    wallets: HashMap<ClientId, Wallet>,
    assets: AssetsCache,
    senders: BalanceEventSenders,
}

impl BalanceLedger {
    pub fn new(assets: AssetsCache, senders: BalanceEventSenders) -> Self {
        Self {
            wallets: HashMap::new(),
            assets,
            senders,
        }
    }

    /// Replace wallets wholesale; startup load path.
    pub fn set_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) {
        for wallet in wallets {
            self.wallets.insert(wallet.client_id, wallet);
        }
    }

    pub fn client_exists(&self, client_id: &ClientId) -> bool {
        self.wallets.contains_key(client_id)
    }

    pub fn get_balance(&self, client_id: &ClientId, asset_id: &AssetId) -> Decimal {
        self.wallets
            .get(client_id)
            .map(|w| w.balance(asset_id))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn get_reserved_balance(&self, client_id: &ClientId, asset_id: &AssetId) -> Decimal {
        self.wallets
            .get(client_id)
            .map(|w| w.reserved(asset_id))
            .unwrap_or(Decimal::ZERO)
    }

    /// Balance available for new orders: `balance - reserved` while the
    /// reserve is positive. A negative reserve (legacy) adds nothing.
    pub fn get_available_balance(&self, client_id: &ClientId, asset_id: &AssetId) -> Decimal {
        match self.wallets.get(client_id).and_then(|w| w.balances.get(asset_id)) {
            Some(balance) => balance.available(),
            None => Decimal::ZERO,
        }
    }

    /// Reserved amount actually backed by the balance; what a resting
    /// order's funds check may count on.
    pub fn get_available_reserved_balance(
        &self,
        client_id: &ClientId,
        asset_id: &AssetId,
    ) -> Decimal {
        match self.wallets.get(client_id).and_then(|w| w.balances.get(asset_id)) {
            Some(balance) => balance.available_reserved(),
            None => Decimal::ZERO,
        }
    }

    /// Read-only diagnostic for legacy states where the reserve exceeds the
    /// balance. Never auto-corrected; correcting here would mask the
    /// upstream operation that produced it.
    pub fn clients_with_reserved_exceeding_balance(&self) -> Vec<(ClientId, AssetId)> {
        let mut result = Vec::new();
        for wallet in self.wallets.values() {
            for balance in wallet.balances.values() {
                if balance.reserved > balance.balance {
                    result.push((wallet.client_id, balance.asset_id.clone()));
                }
            }
        }
        result
    }

    /// Apply a wallet-operation batch transactionally.
    ///
    /// Groups operations by (client, asset), computes the post-state rounded
    /// to each asset's accuracy, persists the affected snapshots together
    /// with whatever the caller already staged in `batch` (order books,
    /// completed orders, sequence number), and only on success commits the
    /// in-memory map and emits one notification per client plus one old/new
    /// pair per (client, asset).
    ///
    /// Sufficiency is NOT checked here: an instruction driving a balance
    /// negative is applied faithfully.
    pub fn process_wallet_operations(
        &mut self,
        message_id: &str,
        timestamp: i64,
        operations: &[WalletOperation],
        mut batch: PersistenceBatch,
        store: &mut dyn PersistenceManager,
    ) -> Result<Vec<ClientBalanceUpdate>, BalanceError> {
        let mut changed: HashMap<(ClientId, AssetId), ClientBalanceUpdate> = HashMap::new();
        let mut order: Vec<(ClientId, AssetId)> = Vec::new();

        for operation in operations {
            let key = (operation.client_id, operation.asset_id.clone());
            let entry = changed.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                ClientBalanceUpdate {
                    client_id: operation.client_id,
                    asset_id: operation.asset_id.clone(),
                    old_balance: self.get_balance(&operation.client_id, &operation.asset_id),
                    new_balance: self.get_balance(&operation.client_id, &operation.asset_id),
                    old_reserved: self
                        .get_reserved_balance(&operation.client_id, &operation.asset_id),
                    new_reserved: self
                        .get_reserved_balance(&operation.client_id, &operation.asset_id),
                }
            });

            // Reference data can lack an asset that old balances still use;
            // in that case amounts are applied unscaled.
            match self.assets.accuracy(&operation.asset_id) {
                Some(accuracy) => {
                    entry.new_balance =
                        round_half_up(entry.new_balance + operation.amount, accuracy);
                    entry.new_reserved =
                        round_half_up(entry.new_reserved + operation.reserved_amount, accuracy);
                }
                None => {
                    entry.new_balance += operation.amount;
                    entry.new_reserved += operation.reserved_amount;
                }
            }
        }

        // Drop no-op changes so downstream consumers only see real updates.
        order.retain(|key| {
            let update = &changed[key];
            update.old_balance != update.new_balance || update.old_reserved != update.new_reserved
        });

        let updates: Vec<ClientBalanceUpdate> =
            order.iter().map(|key| changed[key].clone()).collect();

        batch.balances = updates
            .iter()
            .map(|update| AssetBalanceSnapshot {
                client_id: update.client_id,
                asset_id: update.asset_id.clone(),
                balance: update.new_balance,
                reserved: update.new_reserved,
            })
            .collect();

        if !store.persist(&batch) {
            warn!(message_id, "balance batch rejected by persistence; nothing committed");
            return Err(BalanceError::PersistenceFailed);
        }

        for update in &updates {
            let wallet = self
                .wallets
                .entry(update.client_id)
                .or_insert_with(|| Wallet::new(update.client_id));
            let entry = wallet.balance_entry_mut(&update.asset_id);
            entry.balance = update.new_balance;
            entry.reserved = update.new_reserved;
            debug!(
                client = %update.client_id,
                asset = %update.asset_id,
                balance = %update.new_balance,
                reserved = %update.new_reserved,
                "balance committed"
            );
        }

        let mut notified: Vec<ClientId> = Vec::new();
        for update in &updates {
            if !notified.contains(&update.client_id) {
                notified.push(update.client_id);
                let _ = self.senders.notifications.send(BalanceUpdateNotification {
                    client_id: update.client_id,
                });
            }
        }
        if !updates.is_empty() {
            info!(message_id, count = updates.len(), "balance update");
            let _ = self.senders.updates.send(BalanceUpdateEvent {
                message_id: message_id.to_string(),
                timestamp,
                balances: updates.clone(),
            });
        }

        Ok(updates)
    }
}

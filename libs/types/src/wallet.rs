//! Wallets, wallet operations and balance-update reports
//!
//! A wallet holds one `AssetBalance` per asset. Mutations flow exclusively
//! through all-or-nothing batches of `WalletOperation`s applied by the
//! balance ledger; nothing here validates sufficiency.

use crate::ids::{AssetId, ClientId, WalletOperationId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Balance of one client in one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset_id: AssetId,
    pub balance: Decimal,
    /// Portion earmarked against open orders; unavailable for new orders.
    pub reserved: Decimal,
}

impl AssetBalance {
    pub fn new(asset_id: impl Into<AssetId>) -> Self {
        Self {
            asset_id: asset_id.into(),
            balance: Decimal::ZERO,
            reserved: Decimal::ZERO,
        }
    }

    /// Balance available for new orders.
    ///
    /// A negative reserve (legacy state) never increases availability.
    pub fn available(&self) -> Decimal {
        if self.reserved > Decimal::ZERO {
            self.balance - self.reserved
        } else {
            self.balance
        }
    }

    /// Reserved amount actually backed by the balance.
    ///
    /// Reserved can exceed balance through legacy operations; the excess is
    /// not spendable.
    pub fn available_reserved(&self) -> Decimal {
        if self.reserved > Decimal::ZERO && self.reserved <= self.balance {
            self.reserved
        } else {
            self.balance
        }
    }
}

/// All balances of a single client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub client_id: ClientId,
    pub balances: HashMap<AssetId, AssetBalance>,
}

impl Wallet {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            balances: HashMap::new(),
        }
    }

    pub fn balance(&self, asset_id: &AssetId) -> Decimal {
        self.balances
            .get(asset_id)
            .map(|b| b.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reserved(&self, asset_id: &AssetId) -> Decimal {
        self.balances
            .get(asset_id)
            .map(|b| b.reserved)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn balance_entry_mut(&mut self, asset_id: &AssetId) -> &mut AssetBalance {
        self.balances
            .entry(asset_id.clone())
            .or_insert_with(|| AssetBalance::new(asset_id.clone()))
    }
}

/// A single balance mutation, applied only as part of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletOperation {
    pub id: WalletOperationId,
    pub client_id: ClientId,
    pub asset_id: AssetId,
    /// Signed change to the balance.
    pub amount: Decimal,
    /// Signed change to the reserved balance.
    pub reserved_amount: Decimal,
    /// Unix nanos.
    pub timestamp: i64,
}

impl WalletOperation {
    pub fn new(
        client_id: ClientId,
        asset_id: impl Into<AssetId>,
        amount: Decimal,
        reserved_amount: Decimal,
        timestamp: i64,
    ) -> Self {
        Self {
            id: WalletOperationId::new(),
            client_id,
            asset_id: asset_id.into(),
            amount,
            reserved_amount,
            timestamp,
        }
    }
}

/// Old/new balance pair emitted for each (client, asset) a batch touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBalanceUpdate {
    pub client_id: ClientId,
    pub asset_id: AssetId,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub old_reserved: Decimal,
    pub new_reserved: Decimal,
}

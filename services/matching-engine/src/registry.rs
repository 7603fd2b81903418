//! Order registry
//!
//! The arena owning the single mutable record per live order, indexed by
//! engine id, by client-assigned external id, and by client. Books hold
//! entries pointing here, so a mutation (remaining volume, status) is
//! visible through every index at once. Terminal orders are evicted, never
//! retained.

use std::collections::HashMap;

use types::ids::{AssetPairId, ClientId, OrderId};
use types::order::LimitOrder;

#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: HashMap<OrderId, LimitOrder>,
    by_external_id: HashMap<String, OrderId>,
    by_client: HashMap<ClientId, Vec<OrderId>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: LimitOrder) {
        self.by_external_id
            .insert(order.external_id.clone(), order.id);
        self.by_client
            .entry(order.client_id)
            .or_default()
            .push(order.id);
        self.orders.insert(order.id, order);
    }

    pub fn get(&self, id: &OrderId) -> Option<&LimitOrder> {
        self.orders.get(id)
    }

    pub fn get_mut(&mut self, id: &OrderId) -> Option<&mut LimitOrder> {
        self.orders.get_mut(id)
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Option<&LimitOrder> {
        self.by_external_id
            .get(external_id)
            .and_then(|id| self.orders.get(id))
    }

    /// Replace the stored record with a mutated copy of the same order.
    pub fn apply(&mut self, order: LimitOrder) {
        debug_assert!(self.orders.contains_key(&order.id));
        self.orders.insert(order.id, order);
    }

    /// Evict an order from every index. Idempotent; returns the record.
    pub fn remove(&mut self, id: &OrderId) -> Option<LimitOrder> {
        let order = self.orders.remove(id)?;
        self.by_external_id.remove(&order.external_id);
        if let Some(ids) = self.by_client.get_mut(&order.client_id) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_client.remove(&order.client_id);
            }
        }
        Some(order)
    }

    pub fn remove_by_external_id(&mut self, external_id: &str) -> Option<LimitOrder> {
        let id = *self.by_external_id.get(external_id)?;
        self.remove(&id)
    }

    /// Live orders of one client on one pair and side, admission order.
    pub fn client_orders(
        &self,
        client_id: &ClientId,
        asset_pair_id: Option<&AssetPairId>,
        is_buy: Option<bool>,
    ) -> Vec<OrderId> {
        let Some(ids) = self.by_client.get(client_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter(|id| {
                let Some(order) = self.orders.get(id) else {
                    return false;
                };
                asset_pair_id.is_none_or(|pair| &order.asset_pair_id == pair)
                    && is_buy.is_none_or(|side| order.is_buy_side() == side)
            })
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

//! Reference data: assets and asset pairs
//!
//! The matching core consumes these through read-only caches backed by an
//! external store. A missing entry is surfaced as an `UnknownAsset` /
//! `UnknownAssetPair` rejection by the calling service, never as a panic.

use crate::ids::{AssetId, AssetPairId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tradable or settleable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Number of decimal places amounts in this asset are kept to.
    pub accuracy: u32,
}

impl Asset {
    pub fn new(id: impl Into<AssetId>, accuracy: u32) -> Self {
        Self {
            id: id.into(),
            accuracy,
        }
    }
}

/// A trading pair of two assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    pub id: AssetPairId,
    pub base_asset_id: AssetId,
    pub quoting_asset_id: AssetId,
    /// Number of decimal places for prices on this pair.
    pub accuracy: u32,
}

impl AssetPair {
    pub fn new(
        id: impl Into<AssetPairId>,
        base_asset_id: impl Into<AssetId>,
        quoting_asset_id: impl Into<AssetId>,
        accuracy: u32,
    ) -> Self {
        Self {
            id: id.into(),
            base_asset_id: base_asset_id.into(),
            quoting_asset_id: quoting_asset_id.into(),
            accuracy,
        }
    }
}

/// Read-only asset lookup.
#[derive(Debug, Clone, Default)]
pub struct AssetsCache {
    assets: HashMap<AssetId, Asset>,
}

impl AssetsCache {
    pub fn new(assets: impl IntoIterator<Item = Asset>) -> Self {
        Self {
            assets: assets.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn get(&self, id: &AssetId) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn accuracy(&self, id: &AssetId) -> Option<u32> {
        self.assets.get(id).map(|a| a.accuracy)
    }
}

/// Read-only asset-pair lookup.
#[derive(Debug, Clone, Default)]
pub struct AssetPairsCache {
    pairs: HashMap<AssetPairId, AssetPair>,
}

impl AssetPairsCache {
    pub fn new(pairs: impl IntoIterator<Item = AssetPair>) -> Self {
        Self {
            pairs: pairs.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &AssetPairId) -> Option<&AssetPair> {
        self.pairs.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assets_cache_lookup() {
        let cache = AssetsCache::new([Asset::new("BTC", 8), Asset::new("USD", 2)]);
        assert_eq!(cache.accuracy(&AssetId::new("BTC")), Some(8));
        assert_eq!(cache.accuracy(&AssetId::new("USD")), Some(2));
        assert!(cache.get(&AssetId::new("EUR")).is_none());
    }

    #[test]
    fn test_asset_pairs_cache_lookup() {
        let cache = AssetPairsCache::new([AssetPair::new("BTCUSD", "BTC", "USD", 5)]);
        let pair = cache.get(&AssetPairId::new("BTCUSD")).unwrap();
        assert_eq!(pair.base_asset_id, AssetId::new("BTC"));
        assert_eq!(pair.quoting_asset_id, AssetId::new("USD"));
        assert!(cache.get(&AssetPairId::new("ETHUSD")).is_none());
    }
}

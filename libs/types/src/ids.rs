//! Unique identifier types for matching-core entities
//!
//! Engine-assigned identifiers use UUID v7 for time-sortable ordering,
//! enabling efficient chronological queries and replay. Asset and asset-pair
//! identifiers are opaque strings owned by the reference-data service.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new id with the current timestamp
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Engine-assigned order identifier
    ///
    /// Distinct from the client-assigned external id, which is the key for
    /// idempotent cancel/replace.
    OrderId
}

uuid_id! {
    /// Identifier of a trading client
    ClientId
}

uuid_id! {
    /// Identifier of a single trade leg
    TradeId
}

uuid_id! {
    /// Identifier of a wallet operation
    WalletOperationId
}

/// Asset identifier ("BTC", "USD", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Asset-pair identifier ("BTCUSD", ...)
///
/// Opaque: base and quoting assets are resolved through reference data,
/// never parsed out of the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPairId(String);

impl AssetPairId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetPairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetPairId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

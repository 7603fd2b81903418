//! Error taxonomy for the matching core
//!
//! Nothing in steady-state operation uses these for control flow across the
//! sequencer boundary: rejections are encoded in order statuses, and these
//! errors carry the reason to the caller.

use crate::fee::FeeError;
use crate::ids::{AssetId, AssetPairId};
use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),

    #[error("Fee error: {0}")]
    Fee(#[from] FeeError),

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("Unknown asset pair: {0}")]
    UnknownAssetPair(AssetPairId),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

/// Order-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    #[error("Order not found: {external_id}")]
    NotFound { external_id: String },

    #[error("Order already in terminal state: {status}")]
    AlreadyTerminal { status: String },

    #[error("Order book for {pair} reached its maximum size {max}")]
    BookMaxSize { pair: AssetPairId, max: usize },
}

/// Balance-ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    #[error("Not enough funds (asset: {asset}, required: {required}, available: {available})")]
    NotEnoughFunds {
        asset: AssetId,
        required: String,
        available: String,
    },

    #[error("Persistence rejected the balance batch")]
    PersistenceFailed,
}

//! Fee instructions and fee transfers
//!
//! Orders carry an ordered list of fee instructions. During matching each
//! instruction is applied against the matched leg, maker-sized for the
//! resting order and taker-sized for the aggressor, and realized as a
//! wallet-operation pair from the paying client to the target client.

use crate::ids::{AssetId, ClientId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who pays the fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeType {
    /// Charged to the order's own client.
    ClientFee,
    /// Charged to a third-party source client.
    ExternalFee,
}

/// How the fee size is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeSizeType {
    /// Fraction of the matched leg's receipt amount.
    Percentage,
    /// Fixed amount in the fee asset.
    Absolute,
}

/// A single fee instruction attached to an order.
///
/// Instructions are applied in declared order. `maker_size` applies when the
/// order rests, `taker_size` when it aggresses. An empty `asset_ids` set
/// means the fee is charged in the leg's own asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeInstruction {
    pub fee_type: FeeType,
    pub size_type: FeeSizeType,
    pub maker_size: Decimal,
    pub taker_size: Decimal,
    /// Paying client for external fees; ignored for client fees.
    pub source_client_id: Option<ClientId>,
    pub target_client_id: ClientId,
    /// Assets the fee may be charged in.
    pub asset_ids: Vec<AssetId>,
}

impl FeeInstruction {
    /// Basic well-formedness, checked before admission.
    pub fn validate(&self) -> Result<(), FeeError> {
        if self.maker_size.is_sign_negative() || self.taker_size.is_sign_negative() {
            return Err(FeeError::InvalidInstruction("negative fee size".into()));
        }
        if self.fee_type == FeeType::ExternalFee && self.source_client_id.is_none() {
            return Err(FeeError::InvalidInstruction(
                "external fee without source client".into(),
            ));
        }
        Ok(())
    }
}

/// A realized fee movement, reported alongside the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTransfer {
    pub from_client_id: ClientId,
    pub to_client_id: ClientId,
    pub asset_id: AssetId,
    pub volume: Decimal,
}

/// Fee application failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeeError {
    #[error("invalid fee instruction: {0}")]
    InvalidInstruction(String),

    #[error("fee asset {asset} is outside the instruction's allowed set")]
    AssetOutsideAllowedSet { asset: AssetId },

    #[error("cumulative fee {fee} exceeds leg amount {leg}")]
    ExceedsLegNotional { fee: Decimal, leg: Decimal },

    #[error("not enough funds for fee (asset: {asset}, available: {available}, fee: {fee})")]
    NotEnoughFunds {
        asset: AssetId,
        available: Decimal,
        fee: Decimal,
    },

    #[error("unable to convert fee into asset {asset}")]
    UnconvertibleAsset { asset: AssetId },
}

impl FeeError {
    /// True when the failure is a funds problem rather than a bad instruction.
    pub fn is_not_enough_funds(&self) -> bool {
        matches!(self, FeeError::NotEnoughFunds { .. })
    }
}

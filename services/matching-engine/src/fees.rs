//! Fee application
//!
//! Applies an order's fee instructions against the matched leg, in declared
//! order: maker sizes for the resting order, taker sizes for the aggressor.
//! Every computed fee becomes a wallet-operation pair moving the amount
//! from the paying client to the instruction's target client. Nothing is
//! applied unless every instruction of the leg succeeds.

use std::collections::HashMap;

use rust_decimal::Decimal;
use types::assets::{AssetPair, AssetsCache};
use types::fee::{FeeError, FeeInstruction, FeeSizeType, FeeTransfer, FeeType};
use types::ids::{AssetId, ClientId};
use types::numeric::{div_max_scale, scale_directed, Price};
use types::trade::TradeRole;
use types::wallet::WalletOperation;

use balance_ledger::BalanceLedger;

/// Available balances tracked across the legs of one match, so chained
/// fees cannot spend the same funds twice.
#[derive(Debug, Default)]
pub struct AvailableBalances {
    balances: HashMap<(ClientId, AssetId), Decimal>,
}

impl AvailableBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &mut self,
        ledger: &BalanceLedger,
        client_id: ClientId,
        asset_id: &AssetId,
    ) -> Decimal {
        *self
            .balances
            .entry((client_id, asset_id.clone()))
            .or_insert_with(|| ledger.get_available_balance(&client_id, asset_id))
    }

    pub fn set(&mut self, client_id: ClientId, asset_id: &AssetId, value: Decimal) {
        self.balances.insert((client_id, asset_id.clone()), value);
    }
}

/// Wallet movements and transfer records produced by one leg's fees.
#[derive(Debug, Default)]
pub struct AppliedFees {
    pub transfers: Vec<FeeTransfer>,
    pub operations: Vec<WalletOperation>,
}

/// Apply `instructions` to the leg in which `receipt_client` receives
/// `receipt_amount` (positive) of `receipt_asset`.
///
/// Fails without side effects: the caller discards the leg on error.
#[allow(clippy::too_many_arguments)]
pub fn process_fees(
    instructions: &[FeeInstruction],
    role: TradeRole,
    receipt_client: ClientId,
    receipt_asset: &AssetId,
    receipt_amount: Decimal,
    pair: &AssetPair,
    leg_price: Price,
    assets: &AssetsCache,
    available: &mut AvailableBalances,
    ledger: &BalanceLedger,
    timestamp: i64,
) -> Result<AppliedFees, FeeError> {
    let mut applied = AppliedFees::default();
    if instructions.is_empty() {
        return Ok(applied);
    }

    let mut tentative: HashMap<(ClientId, AssetId), Decimal> = HashMap::new();
    let mut client_fee_in_receipt_asset = Decimal::ZERO;

    for instruction in instructions {
        instruction.validate()?;

        let size = match role {
            TradeRole::Maker => instruction.maker_size,
            TradeRole::Taker => instruction.taker_size,
        };
        if size.is_zero() {
            continue;
        }

        let fee_asset = resolve_fee_asset(instruction, receipt_asset)?;
        let conversion = conversion_coef(&fee_asset, receipt_asset, pair, leg_price)?;
        let accuracy = assets.accuracy(&fee_asset).unwrap_or(receipt_amount.scale());

        // Fees round away from zero: a rounding error may not shrink the fee.
        let fee_amount = match instruction.size_type {
            FeeSizeType::Percentage => {
                scale_directed(receipt_amount.abs() * size * conversion, accuracy, true)
            }
            FeeSizeType::Absolute => scale_directed(size, accuracy, true),
        };
        if fee_amount.is_zero() {
            continue;
        }

        let payer = match instruction.fee_type {
            FeeType::ClientFee => receipt_client,
            FeeType::ExternalFee => instruction.source_client_id.ok_or_else(|| {
                FeeError::InvalidInstruction("external fee without source client".into())
            })?,
        };

        let charged_from_receipt =
            instruction.fee_type == FeeType::ClientFee && fee_asset == *receipt_asset;
        if charged_from_receipt {
            // Capped by what the leg actually delivers.
            client_fee_in_receipt_asset += fee_amount;
            if client_fee_in_receipt_asset > receipt_amount.abs() {
                return Err(FeeError::ExceedsLegNotional {
                    fee: client_fee_in_receipt_asset,
                    leg: receipt_amount.abs(),
                });
            }
        } else {
            // Paid out of the payer's available balance.
            let key = (payer, fee_asset.clone());
            let balance = *tentative
                .entry(key.clone())
                .or_insert_with(|| available.get_or_load(ledger, payer, &fee_asset));
            if balance < fee_amount {
                return Err(FeeError::NotEnoughFunds {
                    asset: fee_asset.clone(),
                    available: balance,
                    fee: fee_amount,
                });
            }
            tentative.insert(key, balance - fee_amount);
        }

        applied.operations.push(WalletOperation::new(
            payer,
            fee_asset.clone(),
            -fee_amount,
            Decimal::ZERO,
            timestamp,
        ));
        applied.operations.push(WalletOperation::new(
            instruction.target_client_id,
            fee_asset.clone(),
            fee_amount,
            Decimal::ZERO,
            timestamp,
        ));
        applied.transfers.push(FeeTransfer {
            from_client_id: payer,
            to_client_id: instruction.target_client_id,
            asset_id: fee_asset,
            volume: fee_amount,
        });
    }

    // All instructions succeeded; commit the tracked balance deductions.
    for ((client, asset), balance) in tentative {
        available.set(client, &asset, balance);
    }
    Ok(applied)
}

/// The asset the fee is charged in: the leg asset when eligible, otherwise
/// the first asset of the allowed set.
fn resolve_fee_asset(
    instruction: &FeeInstruction,
    receipt_asset: &AssetId,
) -> Result<AssetId, FeeError> {
    if instruction.asset_ids.is_empty() || instruction.asset_ids.contains(receipt_asset) {
        return Ok(receipt_asset.clone());
    }
    Ok(instruction.asset_ids[0].clone())
}

/// Multiplier taking an amount in the receipt asset into the fee asset.
///
/// Conversion is only defined inside the traded pair, at the leg price.
fn conversion_coef(
    fee_asset: &AssetId,
    receipt_asset: &AssetId,
    pair: &AssetPair,
    leg_price: Price,
) -> Result<Decimal, FeeError> {
    if fee_asset == receipt_asset {
        return Ok(Decimal::ONE);
    }
    let price = leg_price.as_decimal();
    if price <= Decimal::ZERO {
        return Err(FeeError::UnconvertibleAsset {
            asset: fee_asset.clone(),
        });
    }
    if *fee_asset == pair.base_asset_id && *receipt_asset == pair.quoting_asset_id {
        div_max_scale(Decimal::ONE, price).ok_or(FeeError::UnconvertibleAsset {
            asset: fee_asset.clone(),
        })
    } else if *fee_asset == pair.quoting_asset_id && *receipt_asset == pair.base_asset_id {
        Ok(price)
    } else {
        Err(FeeError::AssetOutsideAllowedSet {
            asset: fee_asset.clone(),
        })
    }
}

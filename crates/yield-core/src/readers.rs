//! Point-in-time vault and pool reads
//!
//! All reads take an explicit block so a sample never mixes current and
//! historical state.

use ethabi::{Address, ParamType, Token, Uint};

use crate::abi::{self, WAD_DECIMALS};
use crate::chain::ChainOracle;
use crate::error::{Result, YieldError};
use crate::vaults::{PpsStrategy, VaultSpec};

/// Curve pool coin index of the locker token
const PEG_COIN_IN: u64 = 1;
/// Curve pool coin index of the reference token (CRV)
const PEG_COIN_OUT: u64 = 0;

/// Notional large enough to dodge rounding, small enough to dodge price impact
pub const DEFAULT_PEG_NOTIONAL: u64 = 10_000;

async fn call_uint<O: ChainOracle + ?Sized>(
    oracle: &O,
    to: Address,
    name: &str,
    params: &[ParamType],
    args: &[Token],
    block: u64,
) -> Result<Uint> {
    let data = abi::encode_call(name, params, args);
    let raw = oracle.call(to, data, block).await?;
    abi::decode_uint(name, &raw)
}

async fn view_uint<O: ChainOracle + ?Sized>(
    oracle: &O,
    to: Address,
    name: &str,
    block: u64,
) -> Result<Uint> {
    call_uint(oracle, to, name, &[], &[], block).await
}

async fn view_tuple<O: ChainOracle + ?Sized>(
    oracle: &O,
    to: Address,
    name: &str,
    outputs: &[ParamType],
    block: u64,
) -> Result<Vec<Token>> {
    let data = abi::encode_call(name, &[], &[]);
    let raw = oracle.call(to, data, block).await?;
    abi::decode_output(name, outputs, &raw)
}

/// Redeemable underlying per vault share at `block`
pub async fn pps<O: ChainOracle + ?Sized>(oracle: &O, vault: &VaultSpec, block: u64) -> Result<f64> {
    match vault.strategy {
        PpsStrategy::DirectExchangeRate => {
            let one_share = abi::units(1, WAD_DECIMALS);
            let assets = call_uint(
                oracle,
                vault.address,
                "convertToAssets",
                &[ParamType::Uint(256)],
                &[Token::Uint(one_share)],
                block,
            )
            .await;
            match assets {
                Ok(assets) => Ok(abi::scale(assets, WAD_DECIMALS)),
                // Not deployed yet at this block
                Err(YieldError::Reverted { .. }) => Ok(0.0),
                Err(e) => Err(e),
            }
        }
        PpsStrategy::PricePerShareField => {
            let pps = view_uint(oracle, vault.address, "pricePerShare", block).await?;
            Ok(abi::scale(pps, WAD_DECIMALS))
        }
        PpsStrategy::UnderlyingOverSupply => {
            let supply = view_uint(oracle, vault.address, "totalSupply", block).await?;
            if supply.is_zero() {
                return Ok(0.0);
            }
            let underlying = view_uint(oracle, vault.address, "totalUnderlying", block).await?;
            Ok(abi::uint_to_f64(underlying) / abi::uint_to_f64(supply))
        }
    }
}

/// Exchange rate of the vault's underlying into the reference token at `block`,
/// quoted via the pool's `get_dy` for `notional` whole units. 1.0 is on peg.
pub async fn peg<O: ChainOracle + ?Sized>(
    oracle: &O,
    vault: &VaultSpec,
    block: u64,
    notional: u64,
) -> Result<f64> {
    let amount_in = abi::units(notional, WAD_DECIMALS);
    let amount_out = call_uint(
        oracle,
        vault.peg_pool,
        "get_dy",
        &[ParamType::Int(128), ParamType::Int(128), ParamType::Uint(256)],
        &[
            Token::Int(Uint::from(PEG_COIN_IN)),
            Token::Int(Uint::from(PEG_COIN_OUT)),
            Token::Uint(amount_in),
        ],
        block,
    )
    .await?;
    Ok(abi::uint_to_f64(amount_out) / abi::uint_to_f64(amount_in))
}

/// Fee and size figures reported alongside the APRs
#[derive(Debug, Clone, PartialEq)]
pub struct VaultStats {
    pub fee_pct: f64,
    pub profit_unlock_period: u64,
    pub total_assets: f64,
}

pub async fn vault_stats<O: ChainOracle + ?Sized>(
    oracle: &O,
    vault: &VaultSpec,
    block: u64,
) -> Result<VaultStats> {
    let address = vault.address;
    match vault.strategy {
        PpsStrategy::UnderlyingOverSupply => {
            let fee = view_uint(oracle, address, "platformFee", block).await?;
            let denominator = view_uint(oracle, address, "FEE_DENOMINATOR", block).await?;
            let total = view_uint(oracle, address, "totalUnderlying", block).await?;
            let fee_pct = if denominator.is_zero() {
                0.0
            } else {
                abi::uint_to_f64(fee) / abi::uint_to_f64(denominator) * 100.0
            };
            Ok(VaultStats {
                fee_pct,
                profit_unlock_period: 0,
                total_assets: abi::scale(total, WAD_DECIMALS),
            })
        }
        PpsStrategy::PricePerShareField => {
            let fee = view_uint(oracle, address, "performanceFee", block).await?;
            let degradation = view_uint(oracle, address, "lockedProfitDegradation", block).await?;
            let total = view_uint(oracle, address, "totalAssets", block).await?;
            // Seconds until locked profit fully unlocks
            let profit_unlock_period = if degradation.is_zero() {
                0
            } else {
                (abi::units(1, WAD_DECIMALS) / degradation).low_u64()
            };
            Ok(VaultStats {
                fee_pct: abi::uint_to_f64(fee) / 100.0,
                profit_unlock_period,
                total_assets: abi::scale(total, WAD_DECIMALS),
            })
        }
        PpsStrategy::DirectExchangeRate => {
            let fee_info = view_tuple(
                oracle,
                address,
                "feeInfo",
                &[
                    ParamType::Address,
                    ParamType::Uint(32),
                    ParamType::Uint(32),
                    ParamType::Uint(32),
                ],
                block,
            )
            .await?;
            let platform_percentage = abi::uint_at("feeInfo", &fee_info, 1)?;

            let reward_info = view_tuple(
                oracle,
                address,
                "rewardInfo",
                &[
                    ParamType::Uint(128),
                    ParamType::Uint(32),
                    ParamType::Uint(48),
                    ParamType::Uint(48),
                ],
                block,
            )
            .await?;
            let period_length = abi::uint_at("rewardInfo", &reward_info, 1)?;

            let total = view_uint(oracle, address, "totalAssets", block).await?;
            Ok(VaultStats {
                fee_pct: abi::uint_to_f64(platform_percentage) / 1e7,
                profit_unlock_period: period_length.low_u64(),
                total_assets: abi::scale(total, WAD_DECIMALS),
            })
        }
    }
}

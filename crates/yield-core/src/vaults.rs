//! Static registry of tracked compounders
//!
//! Each vault family exposes its redeemable value per share differently, so the
//! registry binds every vault to one [`PpsStrategy`] at startup. An unknown
//! strategy name is a configuration error and fails before any chain read.

use ethabi::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::abi;
use crate::error::{Result, YieldError};

/// How a vault's price-per-share is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpsStrategy {
    /// ERC-4626 `convertToAssets(1e18)` (Concentrator asdCRV)
    DirectExchangeRate,
    /// Yearn-style `pricePerShare()` (yvyCRV)
    PricePerShareField,
    /// `totalUnderlying() / totalSupply()` (Union ucvxCRV)
    UnderlyingOverSupply,
}

impl PpsStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PpsStrategy::DirectExchangeRate => "direct_exchange_rate",
            PpsStrategy::PricePerShareField => "price_per_share_field",
            PpsStrategy::UnderlyingOverSupply => "underlying_over_supply",
        }
    }
}

impl fmt::Display for PpsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PpsStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct_exchange_rate" => Ok(PpsStrategy::DirectExchangeRate),
            "price_per_share_field" => Ok(PpsStrategy::PricePerShareField),
            "underlying_over_supply" => Ok(PpsStrategy::UnderlyingOverSupply),
            other => Err(other.to_string()),
        }
    }
}

/// Registry entry as written in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VaultEntry {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub underlying: String,
    pub pool: String,
    pub color: String,
    pub strategy: String,
}

/// A tracked compounder with parsed addresses
#[derive(Debug, Clone)]
pub struct VaultSpec {
    /// Address as configured (checksum case), used as the `ll_data` key
    pub key: String,
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub underlying: Address,
    /// Curve pool quoting the underlying against the reference token
    pub peg_pool: Address,
    pub color: String,
    pub strategy: PpsStrategy,
}

impl VaultSpec {
    pub fn from_entry(entry: &VaultEntry) -> Result<Self> {
        let strategy =
            entry
                .strategy
                .parse()
                .map_err(|strategy| YieldError::UnknownVaultStrategy {
                    address: entry.address.clone(),
                    strategy,
                })?;

        Ok(Self {
            key: entry.address.clone(),
            address: abi::parse_address(&entry.address)?,
            name: entry.name.clone(),
            symbol: entry.symbol.clone(),
            underlying: abi::parse_address(&entry.underlying)?,
            peg_pool: abi::parse_address(&entry.pool)?,
            color: entry.color.clone(),
            strategy,
        })
    }
}

/// Ordered, immutable set of vaults for one process
#[derive(Debug, Clone)]
pub struct VaultRegistry {
    vaults: Vec<VaultSpec>,
}

impl VaultRegistry {
    pub fn from_entries(entries: &[VaultEntry]) -> Result<Self> {
        let vaults = entries
            .iter()
            .map(VaultSpec::from_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { vaults })
    }

    /// The Curve liquid locker compounders tracked by default
    pub fn curve_liquid_lockers() -> Result<Self> {
        Self::from_entries(&default_entries())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VaultSpec> {
        self.vaults.iter()
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    /// Look up by configured key or any-case hex address
    pub fn get(&self, address: &str) -> Option<&VaultSpec> {
        let parsed = abi::parse_address(address).ok()?;
        self.vaults.iter().find(|v| v.address == parsed)
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.vaults.iter().map(|v| v.symbol.as_str()).collect()
    }
}

fn entry(
    address: &str,
    name: &str,
    symbol: &str,
    underlying: &str,
    pool: &str,
    color: &str,
    strategy: PpsStrategy,
) -> VaultEntry {
    VaultEntry {
        address: address.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        underlying: underlying.to_string(),
        pool: pool.to_string(),
        color: color.to_string(),
        strategy: strategy.as_str().to_string(),
    }
}

pub fn default_entries() -> Vec<VaultEntry> {
    vec![
        entry(
            "0xde2bEF0A01845257b4aEf2A2EAa48f6EAeAfa8B7",
            "Union Convex CRV",
            "ucvxCRV",
            "0x62B9c7356A2Dc64a1969e19C23e4f579F9810Aa7",
            "0x971add32Ea87f10bD192671630be3BE8A11b8623",
            "orange",
            PpsStrategy::UnderlyingOverSupply,
        ),
        entry(
            "0x27B5739e22ad9033bcBf192059122d163b60349D",
            "Staked Yearn CRV",
            "yvyCRV",
            "0xFCc5c47bE19d06BF83eB04298b026F81069ff65b",
            "0x99f5aCc8EC2Da2BC0771c32814EFF52b712de1E5",
            "blue",
            PpsStrategy::PricePerShareField,
        ),
        entry(
            "0x43E54C2E7b3e294De3A155785F52AB49d87B9922",
            "Aladin StakeDao CRV",
            "asdCRV",
            "0xD1b5651E55D4CeeD36251c61c50C889B36F6abB5",
            "0xCA0253A98D16e9C1e3614caFDA19318EE69772D0",
            "black",
            PpsStrategy::DirectExchangeRate,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = VaultRegistry::curve_liquid_lockers().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.symbols(), vec!["ucvxCRV", "yvyCRV", "asdCRV"]);

        let yearn = registry
            .get("0x27b5739e22ad9033bcbf192059122d163b60349d")
            .unwrap();
        assert_eq!(yearn.strategy, PpsStrategy::PricePerShareField);
        assert_eq!(yearn.key, "0x27B5739e22ad9033bcBf192059122d163b60349D");
    }

    #[test]
    fn test_unknown_strategy_fails_fast() {
        let mut entries = default_entries();
        entries[1].strategy = "locked_profit".to_string();

        let err = VaultRegistry::from_entries(&entries).unwrap_err();
        match err {
            YieldError::UnknownVaultStrategy { address, strategy } => {
                assert_eq!(address, "0x27B5739e22ad9033bcBf192059122d163b60349D");
                assert_eq!(strategy, "locked_profit");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strategy_names_roundtrip() {
        for strategy in [
            PpsStrategy::DirectExchangeRate,
            PpsStrategy::PricePerShareField,
            PpsStrategy::UnderlyingOverSupply,
        ] {
            assert_eq!(strategy.as_str().parse::<PpsStrategy>(), Ok(strategy));
        }
    }

    #[test]
    fn test_bad_pool_address_is_rejected() {
        let mut entries = default_entries();
        entries[0].pool = "0xnope".to_string();
        assert!(matches!(
            VaultRegistry::from_entries(&entries),
            Err(YieldError::InvalidAddress(_))
        ));
    }
}

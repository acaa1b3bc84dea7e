//! APR time series and vault snapshots
//!
//! Drives the resolver and readers over rolling windows:
//!
//! - **Weekly buckets**: the last N complete weeks, each annualized over
//!   exactly one week. Weeks are aligned to Unix-epoch week boundaries
//!   (Thursday 00:00 UTC, as Curve's own epochs are), newest first.
//! - **Trailing anchors**: from a block slightly behind the head, back N days
//!   for each configured N, annualized over the real time between the two
//!   resolved blocks.
//!
//! A bucket whose timestamp cannot be resolved (newer than the head) is skipped
//! with a warning; any other failure aborts the whole series.

use chrono::{DateTime, Utc};
use ethabi::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::abi;
use crate::apr::{self, Sample};
use crate::chain::ChainOracle;
use crate::error::{Result, YieldError};
use crate::readers::{self, DEFAULT_PEG_NOTIONAL};
use crate::resolver::{DAY, Mode, Resolver, WEEK};
use crate::vaults::{VaultRegistry, VaultSpec};

/// Quarter of a 365-day year
pub const QUARTER: i64 = 365 * DAY / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Weekly,
    TrailingAnchors,
}

impl WindowKind {
    /// Chart title used in file names and API paths
    pub fn title(&self) -> &'static str {
        match self {
            WindowKind::Weekly => "Weekly_APRs",
            WindowKind::TrailingAnchors => "APR_Since",
        }
    }

    pub fn from_title(title: &str) -> Option<Self> {
        match title {
            "Weekly_APRs" => Some(WindowKind::Weekly),
            "APR_Since" => Some(WindowKind::TrailingAnchors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Complete weeks in the weekly series
    pub weekly_buckets: usize,
    /// Seconds subtracted from "now" before flooring to a week
    pub weekly_margin_secs: i64,
    /// Seconds behind "now" for the trailing-anchor block
    pub head_margin_secs: i64,
    /// Day offsets plotted in the trailing-anchor chart
    pub chart_trailing_days: Vec<u64>,
    /// Day offsets reported in vault snapshots
    pub snapshot_days: Vec<u64>,
    /// Whole units quoted through the peg pool
    pub peg_notional: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        let weekly_buckets = (QUARTER / WEEK) as usize;
        Self {
            weekly_buckets,
            weekly_margin_secs: 5,
            head_margin_secs: 1000,
            chart_trailing_days: (1..=weekly_buckets as u64).map(|w| w * 7).collect(),
            snapshot_days: vec![30, 60, 90],
            peg_notional: DEFAULT_PEG_NOTIONAL,
        }
    }
}

/// One row of an APR series; values are percentages keyed by vault symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AprObservation {
    pub date: DateTime<Utc>,
    pub start_block: u64,
    pub end_block: u64,
    /// Peg at the window end, only present for peg-adjusted series
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pegs: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub aprs: BTreeMap<String, f64>,
}

/// Two samples of one vault and the rate between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AprWindow {
    pub start: Sample,
    pub end: Sample,
    pub apr: f64,
}

/// Static registry data plus the figures derived on each run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub name: String,
    pub symbol: String,
    pub underlying: String,
    pub pool: String,
    pub color: String,
    pub strategy: String,
    pub fee_pct: f64,
    pub profit_unlock_period: u64,
    pub total_assets: f64,
    pub peg: f64,
    pub price: f64,
    pub tvl: f64,
    /// Trailing APR (fraction) by day count
    pub aprs: BTreeMap<u64, f64>,
    pub aprs_adjusted: BTreeMap<u64, f64>,
}

pub struct Sampler<'a, O: ChainOracle + ?Sized> {
    oracle: &'a O,
    registry: &'a VaultRegistry,
    settings: SamplerSettings,
    resolver: Resolver<'a, O>,
    pps_memo: HashMap<(Address, u64), f64>,
    peg_memo: HashMap<(Address, u64), f64>,
}

impl<'a, O: ChainOracle + ?Sized> Sampler<'a, O> {
    pub fn new(oracle: &'a O, registry: &'a VaultRegistry, settings: SamplerSettings) -> Self {
        Self::with_resolver(oracle, registry, settings, Resolver::new(oracle))
    }

    pub fn with_resolver(
        oracle: &'a O,
        registry: &'a VaultRegistry,
        settings: SamplerSettings,
        resolver: Resolver<'a, O>,
    ) -> Self {
        Self {
            oracle,
            registry,
            settings,
            resolver,
            pps_memo: HashMap::new(),
            peg_memo: HashMap::new(),
        }
    }

    pub fn resolver(&self) -> &Resolver<'a, O> {
        &self.resolver
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    async fn pps_at(&mut self, vault: &VaultSpec, block: u64) -> Result<f64> {
        if let Some(pps) = self.pps_memo.get(&(vault.address, block)) {
            return Ok(*pps);
        }
        let pps = readers::pps(self.oracle, vault, block).await?;
        self.pps_memo.insert((vault.address, block), pps);
        Ok(pps)
    }

    async fn peg_at(&mut self, vault: &VaultSpec, block: u64) -> Result<f64> {
        if let Some(peg) = self.peg_memo.get(&(vault.address, block)) {
            return Ok(*peg);
        }
        let peg = readers::peg(self.oracle, vault, block, self.settings.peg_notional).await?;
        self.peg_memo.insert((vault.address, block), peg);
        Ok(peg)
    }

    /// Observe `vault` at `block`. The peg is only read when asked for and
    /// is 1.0 otherwise.
    pub async fn sample(&mut self, vault: &VaultSpec, block: u64, with_peg: bool) -> Result<Sample> {
        let timestamp = self.resolver.timestamp_at(block).await?;
        let pps = self.pps_at(vault, block).await?;
        let peg = if with_peg {
            self.peg_at(vault, block).await?
        } else {
            1.0
        };
        Ok(Sample {
            block,
            timestamp,
            pps,
            peg,
        })
    }

    /// Resolve `target` to the block at or before it; `None` if it is past the head
    async fn resolve_or_skip(&mut self, target: i64) -> Result<Option<(u64, i64)>> {
        match self.resolver.resolve_with_timestamp(target, Mode::Before).await {
            Ok(found) => Ok(Some(found)),
            Err(YieldError::OutOfRange {
                target,
                head_timestamp,
            }) => {
                tracing::warn!(target, head_timestamp, "skipping sample newer than chain head");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// APR of `vault` between the blocks at or before two timestamps,
    /// annualized over the time actually separating those blocks
    pub async fn apr_between(
        &mut self,
        vault: &VaultSpec,
        start_target: i64,
        end_target: i64,
        adjust_for_peg: bool,
    ) -> Result<AprWindow> {
        let start_block = self.resolver.resolve(start_target, Mode::Before).await?;
        let end_block = self.resolver.resolve(end_target, Mode::Before).await?;
        self.window(vault, start_block, end_block, None, adjust_for_peg)
            .await
    }

    /// Sample both ends and annualize, over `elapsed` seconds if given or
    /// the blocks' own timestamp difference otherwise
    async fn window(
        &mut self,
        vault: &VaultSpec,
        start_block: u64,
        end_block: u64,
        elapsed: Option<i64>,
        adjust_for_peg: bool,
    ) -> Result<AprWindow> {
        let start = self.sample(vault, start_block, adjust_for_peg).await?;
        let end = self.sample(vault, end_block, adjust_for_peg).await?;
        let elapsed = elapsed.unwrap_or(end.timestamp - start.timestamp);
        Ok(AprWindow {
            start,
            end,
            apr: apr::annualize(&start, &end, elapsed, adjust_for_peg),
        })
    }

    /// The last `weekly_buckets` complete weeks, newest first
    pub async fn weekly_aprs(&mut self, now: i64, adjust_for_peg: bool) -> Result<Vec<AprObservation>> {
        let anchor_time = now - self.settings.weekly_margin_secs;
        // Flooring to a week boundary keeps the week still in progress out
        let anchor = anchor_time.div_euclid(WEEK) * WEEK;
        let registry = self.registry;
        let mut observations = Vec::with_capacity(self.settings.weekly_buckets);

        for i in 0..self.settings.weekly_buckets as i64 {
            let week_end = anchor - WEEK * i;
            let Some((start_block, _)) = self.resolve_or_skip(week_end - WEEK).await? else {
                continue;
            };
            let Some((end_block, _)) = self.resolve_or_skip(week_end).await? else {
                continue;
            };

            let mut observation = AprObservation {
                date: to_datetime(week_end)?,
                start_block,
                end_block,
                pegs: BTreeMap::new(),
                aprs: BTreeMap::new(),
            };
            for vault in registry.iter() {
                let window =
                    self.window(vault, start_block, end_block, Some(WEEK), adjust_for_peg).await?;
                observation
                    .aprs
                    .insert(vault.symbol.clone(), window.apr * 100.0);
                if adjust_for_peg {
                    observation.pegs.insert(vault.symbol.clone(), window.end.peg);
                }
            }
            observations.push(observation);
        }

        tracing::info!(
            adjust_for_peg,
            observations = observations.len(),
            "weekly APR series sampled"
        );
        Ok(observations)
    }

    /// One observation per day offset, each measured back from the same anchor
    pub async fn trailing_aprs(
        &mut self,
        now: i64,
        days: &[u64],
        adjust_for_peg: bool,
    ) -> Result<Vec<AprObservation>> {
        let Some((end_block, end_ts)) = self
            .resolve_or_skip(now - self.settings.head_margin_secs)
            .await?
        else {
            return Ok(Vec::new());
        };
        let registry = self.registry;
        let mut observations = Vec::with_capacity(days.len());

        for &d in days {
            let Some((start_block, start_ts)) =
                self.resolve_or_skip(end_ts - d as i64 * DAY).await?
            else {
                continue;
            };

            let mut observation = AprObservation {
                date: to_datetime(start_ts)?,
                start_block,
                end_block,
                pegs: BTreeMap::new(),
                aprs: BTreeMap::new(),
            };
            for vault in registry.iter() {
                let window = self
                    .window(vault, start_block, end_block, None, adjust_for_peg)
                    .await?;
                observation
                    .aprs
                    .insert(vault.symbol.clone(), window.apr * 100.0);
                if adjust_for_peg {
                    observation.pegs.insert(vault.symbol.clone(), window.end.peg);
                }
            }
            observations.push(observation);
        }

        tracing::info!(
            adjust_for_peg,
            observations = observations.len(),
            "trailing APR series sampled"
        );
        Ok(observations)
    }

    pub async fn apr_series(
        &mut self,
        kind: WindowKind,
        now: i64,
        adjust_for_peg: bool,
    ) -> Result<Vec<AprObservation>> {
        match kind {
            WindowKind::Weekly => self.weekly_aprs(now, adjust_for_peg).await,
            WindowKind::TrailingAnchors => {
                let days = self.settings.chart_trailing_days.clone();
                self.trailing_aprs(now, &days, adjust_for_peg).await
            }
        }
    }

    /// Fees, size, peg, price and trailing APRs for one vault.
    /// `reference_price` is the USD price of the peg reference token.
    pub async fn vault_snapshot(
        &mut self,
        vault: &VaultSpec,
        reference_price: f64,
        now: i64,
    ) -> Result<VaultSnapshot> {
        let (end_block, end_ts) = self
            .resolver
            .resolve_with_timestamp(now - self.settings.head_margin_secs, Mode::Before)
            .await?;

        let stats = readers::vault_stats(self.oracle, vault, end_block).await?;
        let peg = self.peg_at(vault, end_block).await?;
        let price = reference_price * peg;

        let mut aprs = BTreeMap::new();
        let mut aprs_adjusted = BTreeMap::new();
        for d in self.settings.snapshot_days.clone() {
            let start_block = self
                .resolver
                .resolve(end_ts - d as i64 * DAY, Mode::Before)
                .await?;
            let plain = self.window(vault, start_block, end_block, None, false).await?;
            let adjusted = self.window(vault, start_block, end_block, None, true).await?;
            aprs.insert(d, plain.apr);
            aprs_adjusted.insert(d, adjusted.apr);
        }

        Ok(VaultSnapshot {
            name: vault.name.clone(),
            symbol: vault.symbol.clone(),
            underlying: abi::format_address(&vault.underlying),
            pool: abi::format_address(&vault.peg_pool),
            color: vault.color.clone(),
            strategy: vault.strategy.to_string(),
            fee_pct: stats.fee_pct,
            profit_unlock_period: stats.profit_unlock_period,
            total_assets: stats.total_assets,
            peg,
            price,
            tvl: price * stats.total_assets,
            aprs,
            aprs_adjusted,
        })
    }

    /// Snapshots of every registered vault keyed by configured address
    pub async fn vault_snapshots(
        &mut self,
        reference_price: f64,
        now: i64,
    ) -> Result<BTreeMap<String, VaultSnapshot>> {
        let registry = self.registry;
        let mut snapshots = BTreeMap::new();
        for vault in registry.iter() {
            let snapshot = self.vault_snapshot(vault, reference_price, now).await?;
            tracing::debug!(symbol = %vault.symbol, tvl = snapshot.tvl, "vault snapshot taken");
            snapshots.insert(vault.key.clone(), snapshot);
        }
        Ok(snapshots)
    }
}

fn to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| YieldError::decode("timestamp", ts))
}

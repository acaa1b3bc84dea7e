//! Wall-clock timestamp to block height resolution
//!
//! Binary search over `[0, head]` using the chain's non-decreasing block
//! timestamps. Every probe is an oracle round trip, so probed timestamps and
//! finished resolutions are memoized for the lifetime of the resolver. Heights
//! never change their timestamp, which makes the probe memo safe to persist
//! across runs (see [`Resolver::with_known_timestamps`]).

use std::collections::HashMap;

use crate::chain::ChainOracle;
use crate::error::{Result, YieldError};

pub const DAY: i64 = 86_400;
pub const WEEK: i64 = 7 * DAY;

/// Which side of the target a resolution lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Highest height whose timestamp is `<= target`
    Before,
    /// Lowest height whose timestamp is `>= target`
    After,
}

pub struct Resolver<'a, O: ChainOracle + ?Sized> {
    oracle: &'a O,
    head: Option<u64>,
    timestamps: HashMap<u64, i64>,
    resolved: HashMap<(i64, Mode), u64>,
    oracle_reads: usize,
}

impl<'a, O: ChainOracle + ?Sized> Resolver<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self::with_known_timestamps(oracle, HashMap::new())
    }

    /// Seed the probe memo with timestamps recorded by earlier runs
    pub fn with_known_timestamps(oracle: &'a O, timestamps: HashMap<u64, i64>) -> Self {
        Self {
            oracle,
            head: None,
            timestamps,
            resolved: HashMap::new(),
            oracle_reads: 0,
        }
    }

    /// Chain head, read once per resolver so a run sees a fixed search space
    pub async fn head(&mut self) -> Result<u64> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let head = self.oracle.current_height().await?;
        self.head = Some(head);
        Ok(head)
    }

    pub async fn timestamp_at(&mut self, height: u64) -> Result<i64> {
        if let Some(ts) = self.timestamps.get(&height) {
            return Ok(*ts);
        }
        let ts = self.oracle.timestamp_at(height).await?;
        self.oracle_reads += 1;
        self.timestamps.insert(height, ts);
        Ok(ts)
    }

    /// Timestamp of the current head block
    pub async fn head_timestamp(&mut self) -> Result<i64> {
        let head = self.head().await?;
        self.timestamp_at(head).await
    }

    /// Map `target` to a block height.
    ///
    /// Fails with [`YieldError::OutOfRange`] when `target` is newer than the
    /// head block. Targets at or before genesis resolve to height 0 in both
    /// modes.
    pub async fn resolve(&mut self, target: i64, mode: Mode) -> Result<u64> {
        if let Some(height) = self.resolved.get(&(target, mode)) {
            return Ok(*height);
        }

        let head = self.head().await?;
        let head_timestamp = self.timestamp_at(head).await?;
        if target > head_timestamp {
            return Err(YieldError::OutOfRange {
                target,
                head_timestamp,
            });
        }

        let height = match mode {
            Mode::After => self.first_reaching(target, false, head).await?.unwrap_or(head),
            Mode::Before => match self.first_reaching(target, true, head).await? {
                None => head,
                Some(0) => 0,
                Some(h) => h - 1,
            },
        };

        self.resolved.insert((target, mode), height);
        Ok(height)
    }

    /// Resolve and return the block's own timestamp alongside it
    pub async fn resolve_with_timestamp(&mut self, target: i64, mode: Mode) -> Result<(u64, i64)> {
        let height = self.resolve(target, mode).await?;
        let ts = self.timestamp_at(height).await?;
        Ok((height, ts))
    }

    /// First and last block of the week starting at `week_start`
    pub async fn week_block_range(&mut self, week_start: i64) -> Result<(u64, u64)> {
        let start = self.resolve(week_start, Mode::After).await?;
        let next = self.resolve(week_start + WEEK, Mode::After).await?;
        Ok((start, next.saturating_sub(1).max(start)))
    }

    /// Lowest height whose timestamp passes `target` (`> target` when
    /// `strict`, `>= target` otherwise), or `None` if even the head does not.
    async fn first_reaching(&mut self, target: i64, strict: bool, head: u64) -> Result<Option<u64>> {
        let reaches = |ts: i64| if strict { ts > target } else { ts >= target };

        if !reaches(self.timestamp_at(head).await?) {
            return Ok(None);
        }
        if reaches(self.timestamp_at(0).await?) {
            return Ok(Some(0));
        }

        // Invariant: !reaches(ts(lo)) && reaches(ts(hi))
        let (mut lo, mut hi) = (0u64, head);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if reaches(self.timestamp_at(mid).await?) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(Some(hi))
    }

    /// Timestamps probed so far, for persisting between runs
    pub fn known_timestamps(&self) -> &HashMap<u64, i64> {
        &self.timestamps
    }

    /// Timestamp reads that actually went to the oracle
    pub fn oracle_reads(&self) -> usize {
        self.oracle_reads
    }
}

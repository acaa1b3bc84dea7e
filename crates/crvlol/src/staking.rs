//! Weekly staking records
//!
//! Each row covers one account for one protocol week. Weeks start on a Unix
//! week boundary; block bounds missing from an import are filled in from the
//! chain.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use yield_core::{ChainOracle, Mode, Resolver, YieldError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingWeek {
    /// Database ID (None for rows not yet saved)
    #[serde(default, skip_deserializing)]
    pub id: Option<i64>,
    pub account: String,
    pub week_number: u64,
    /// Unix timestamp of the week's first second
    pub week_start: i64,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub end_block: Option<u64>,
    pub stake_amount: f64,
    pub weight: f64,
}

impl StakingWeek {
    pub fn has_blocks(&self) -> bool {
        self.start_block.is_some() && self.end_block.is_some()
    }
}

/// Load staking weeks from a CSV file
pub fn load_from_csv(path: &Path) -> Result<Vec<StakingWeek>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut weeks = Vec::new();
    for result in rdr.deserialize() {
        let mut week: StakingWeek = result?;
        week.id = None;
        weeks.push(week);
    }
    Ok(weeks)
}

/// Resolve block bounds for rows that lack them. Returns how many rows changed.
///
/// A week that has not finished yet only gets its start block; a week that
/// has not started is left alone.
pub async fn fill_missing_blocks<O: ChainOracle + ?Sized>(
    resolver: &mut Resolver<'_, O>,
    weeks: &mut [StakingWeek],
) -> yield_core::Result<usize> {
    let mut filled = 0;

    for week in weeks.iter_mut().filter(|w| !w.has_blocks()) {
        match resolver.week_block_range(week.week_start).await {
            Ok((start, end)) => {
                week.start_block = Some(start);
                week.end_block = Some(end);
                filled += 1;
            }
            Err(YieldError::OutOfRange { .. }) => {
                match resolver.resolve(week.week_start, Mode::After).await {
                    Ok(start) => {
                        week.start_block = Some(start);
                        filled += 1;
                    }
                    Err(YieldError::OutOfRange { .. }) => {
                        tracing::warn!(
                            account = %week.account,
                            week = week.week_number,
                            "week starts after chain head, leaving blocks empty"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use yield_core::Address;

    const HOUR: i64 = 3600;
    const WEEK: i64 = 7 * 24 * HOUR;

    /// One block per hour from t=0
    struct HourlyChain {
        head: u64,
    }

    #[async_trait]
    impl ChainOracle for HourlyChain {
        async fn current_height(&self) -> yield_core::Result<u64> {
            Ok(self.head)
        }

        async fn timestamp_at(&self, height: u64) -> yield_core::Result<i64> {
            Ok(height as i64 * HOUR)
        }

        async fn call(&self, _to: Address, _data: Vec<u8>, _block: u64) -> yield_core::Result<Vec<u8>> {
            Err(YieldError::Reverted {
                method: "call".to_string(),
                message: "no contracts".to_string(),
            })
        }
    }

    fn week(n: u64, start_block: Option<u64>) -> StakingWeek {
        StakingWeek {
            id: None,
            account: "0x00000000000000000000000000000000000000aa".to_string(),
            week_number: n,
            week_start: n as i64 * WEEK,
            start_block,
            end_block: start_block.map(|b| b + 1),
            stake_amount: 100.0,
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn test_fill_missing_blocks() {
        // 3.5 weeks of history
        let chain = HourlyChain { head: 588 };
        let mut resolver = Resolver::new(&chain);
        let mut weeks = vec![week(1, None), week(2, Some(5)), week(3, None), week(4, None)];

        let filled = fill_missing_blocks(&mut resolver, &mut weeks).await.unwrap();
        assert_eq!(filled, 2);

        // Complete week
        assert_eq!(weeks[0].start_block, Some(168));
        assert_eq!(weeks[0].end_block, Some(335));
        // Already present, untouched
        assert_eq!(weeks[1].start_block, Some(5));
        // Current week: start only
        assert_eq!(weeks[2].start_block, Some(504));
        assert_eq!(weeks[2].end_block, None);
        // Future week
        assert_eq!(weeks[3].start_block, None);
    }

    #[test]
    fn test_load_from_csv_with_blank_blocks() {
        let dir = std::env::temp_dir().join(format!("crvlol-staking-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("staking.csv");
        std::fs::write(
            &path,
            "account,week_number,week_start,start_block,end_block,stake_amount,weight\n\
             0xaa,12,1718236800,,,2500.5,0.75\n\
             0xbb,12,1718236800,20080000,20129999,10,1\n",
        )
        .unwrap();

        let weeks = load_from_csv(&path).unwrap();
        assert_eq!(weeks.len(), 2);
        assert!(!weeks[0].has_blocks());
        assert_eq!(weeks[0].stake_amount, 2500.5);
        assert_eq!(weeks[1].start_block, Some(20_080_000));
        assert_eq!(weeks[1].end_block, Some(20_129_999));
    }
}

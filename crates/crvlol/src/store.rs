//! SQLite storage for harvests, staking weeks and block timestamps
//!
//! Harvests and staking weeks are imported records served by the API. Block
//! timestamps are a memo of the chain's height to time mapping; a height's
//! timestamp never changes, so rows are never invalidated.

use anyhow::{Context, Result};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use crate::harvests::Harvest;
use crate::staking::StakingWeek;

/// Record store wrapper
pub struct Store {
    pool: SqlitePool,
}

/// Row type for harvests query
#[derive(FromRow)]
struct HarvestRow {
    id: i64,
    profit: String,
    timestamp: i64,
    name: String,
    underlying: String,
    compounder: String,
    block: i64,
    txn_hash: String,
    date_str: String,
}

/// Row type for staking weeks query
#[derive(FromRow)]
struct StakingWeekRow {
    id: i64,
    account: String,
    week_number: i64,
    week_start: i64,
    start_block: Option<i64>,
    end_block: Option<i64>,
    stake_amount: f64,
    weight: f64,
}

/// One page of a listing plus the unpaged total
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl Store {
    /// Open or create the database
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // SQLx requires the file to exist for SQLite
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let url = format!("sqlite:{}", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to open database")?;

        // The API server reads while an update run writes
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "
            -- Compounder harvest events
            CREATE TABLE IF NOT EXISTS crv_ll_harvests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profit TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                name TEXT NOT NULL,
                underlying TEXT NOT NULL,
                compounder TEXT NOT NULL,
                block INTEGER NOT NULL,
                txn_hash TEXT NOT NULL,
                date_str TEXT NOT NULL,
                UNIQUE (txn_hash, compounder)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_harvests_timestamp ON crv_ll_harvests(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "
            -- Per-account stake for each protocol week
            CREATE TABLE IF NOT EXISTS staking_weeks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account TEXT NOT NULL,
                week_number INTEGER NOT NULL,
                week_start INTEGER NOT NULL,
                start_block INTEGER,
                end_block INTEGER,
                stake_amount REAL NOT NULL,
                weight REAL NOT NULL,
                UNIQUE (account, week_number)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "
            -- Height to timestamp memo for the block resolver
            CREATE TABLE IF NOT EXISTS block_timestamps (
                height INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Harvests
    // =========================================================================

    /// Newest-first page of harvests
    pub async fn get_harvests(&self, offset: u64, limit: u64) -> Result<Page<Harvest>> {
        let rows: Vec<HarvestRow> = sqlx::query_as(
            "SELECT id, profit, timestamp, name, underlying, compounder, block, txn_hash, date_str
             FROM crv_ll_harvests
             ORDER BY timestamp DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crv_ll_harvests")
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(|r| Harvest {
                    id: Some(r.id),
                    profit: r.profit,
                    timestamp: r.timestamp,
                    name: r.name,
                    underlying: r.underlying,
                    compounder: r.compounder,
                    block: r.block as u64,
                    txn_hash: r.txn_hash,
                    date_str: r.date_str,
                })
                .collect(),
            total: total.0 as u64,
        })
    }

    /// Store harvests (in a transaction for atomicity). Re-imports replace.
    pub async fn import_harvests(&self, harvests: &[Harvest]) -> Result<usize> {
        if harvests.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for harvest in harvests {
            sqlx::query(
                "INSERT OR REPLACE INTO crv_ll_harvests
                 (profit, timestamp, name, underlying, compounder, block, txn_hash, date_str)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&harvest.profit)
            .bind(harvest.timestamp)
            .bind(&harvest.name)
            .bind(&harvest.underlying)
            .bind(&harvest.compounder)
            .bind(harvest.block as i64)
            .bind(&harvest.txn_hash)
            .bind(&harvest.date_str)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(harvests.len())
    }

    // =========================================================================
    // Staking Weeks
    // =========================================================================

    /// Page of staking weeks, newest week first, optionally for one account
    pub async fn get_staking_weeks(
        &self,
        account: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<StakingWeek>> {
        // Accounts compare case-insensitively; NULL matches every account
        let account = account.map(str::to_lowercase);

        let rows: Vec<StakingWeekRow> = sqlx::query_as(
            "SELECT id, account, week_number, week_start, start_block, end_block, stake_amount, weight
             FROM staking_weeks
             WHERE ?1 IS NULL OR lower(account) = ?1
             ORDER BY week_number DESC, account
             LIMIT ?2 OFFSET ?3",
        )
        .bind(&account)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM staking_weeks WHERE ?1 IS NULL OR lower(account) = ?1",
        )
        .bind(&account)
        .fetch_one(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(|r| StakingWeek {
                    id: Some(r.id),
                    account: r.account,
                    week_number: r.week_number as u64,
                    week_start: r.week_start,
                    start_block: r.start_block.map(|b| b as u64),
                    end_block: r.end_block.map(|b| b as u64),
                    stake_amount: r.stake_amount,
                    weight: r.weight,
                })
                .collect(),
            total: total.0 as u64,
        })
    }

    /// Store staking weeks (in a transaction for atomicity)
    pub async fn import_staking_weeks(&self, weeks: &[StakingWeek]) -> Result<usize> {
        if weeks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for week in weeks {
            sqlx::query(
                "INSERT OR REPLACE INTO staking_weeks
                 (account, week_number, week_start, start_block, end_block, stake_amount, weight)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&week.account)
            .bind(week.week_number as i64)
            .bind(week.week_start)
            .bind(week.start_block.map(|b| b as i64))
            .bind(week.end_block.map(|b| b as i64))
            .bind(week.stake_amount)
            .bind(week.weight)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(weeks.len())
    }

    // =========================================================================
    // Block Timestamps
    // =========================================================================

    pub async fn get_block_timestamps(&self) -> Result<HashMap<u64, i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT height, timestamp FROM block_timestamps")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(h, ts)| (h as u64, ts)).collect())
    }

    /// Store block timestamps (in a transaction for atomicity)
    pub async fn store_block_timestamps(&self, timestamps: &HashMap<u64, i64>) -> Result<()> {
        if timestamps.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for (height, timestamp) in timestamps {
            sqlx::query("INSERT OR REPLACE INTO block_timestamps (height, timestamp) VALUES (?, ?)")
                .bind(*height as i64)
                .bind(*timestamp)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Utilities
    // =========================================================================

    /// Get record counts
    pub async fn stats(&self) -> Result<StoreStats> {
        let harvests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crv_ll_harvests")
            .fetch_one(&self.pool)
            .await?;
        let staking_weeks: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM staking_weeks")
            .fetch_one(&self.pool)
            .await?;
        let block_timestamps: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM block_timestamps")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            harvests: harvests.0 as u64,
            staking_weeks: staking_weeks.0 as u64,
            block_timestamps: block_timestamps.0 as u64,
        })
    }
}

/// Record counts
#[derive(Debug)]
pub struct StoreStats {
    pub harvests: u64,
    pub staking_weeks: u64,
    pub block_timestamps: u64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} harvests, {} staking weeks, {} block timestamps",
            self.harvests, self.staking_weeks, self.block_timestamps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_db(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("crvlol-store-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("crvlol.db")
    }

    fn harvest(timestamp: i64, txn_hash: &str) -> Harvest {
        Harvest {
            id: None,
            profit: "1520.123456789012345678".to_string(),
            timestamp,
            name: "Staked Yearn CRV".to_string(),
            underlying: "yCRV".to_string(),
            compounder: "0x27B5739e22ad9033bcBf192059122d163b60349D".to_string(),
            block: 20_000_000,
            txn_hash: txn_hash.to_string(),
            date_str: String::new(),
        }
    }

    fn staking_week(account: &str, week_number: u64) -> StakingWeek {
        StakingWeek {
            id: None,
            account: account.to_string(),
            week_number,
            week_start: 1_718_236_800 + week_number as i64 * 604_800,
            start_block: Some(20_000_000 + week_number),
            end_block: None,
            stake_amount: 10.5,
            weight: 0.5,
        }
    }

    #[tokio::test]
    async fn test_harvests_newest_first_with_total() {
        let store = Store::open(&scratch_db("harvests")).await.unwrap();
        store
            .import_harvests(&[harvest(100, "0xa"), harvest(300, "0xb"), harvest(200, "0xc")])
            .await
            .unwrap();

        let page = store.get_harvests(0, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(
            page.items.iter().map(|h| h.timestamp).collect::<Vec<_>>(),
            vec![300, 200]
        );
        // Decimal text is preserved exactly
        assert_eq!(page.items[0].profit, "1520.123456789012345678");

        let rest = store.get_harvests(2, 2).await.unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].timestamp, 100);
    }

    #[tokio::test]
    async fn test_harvest_reimport_replaces() {
        let store = Store::open(&scratch_db("reimport")).await.unwrap();
        store.import_harvests(&[harvest(100, "0xa")]).await.unwrap();
        store.import_harvests(&[harvest(100, "0xa")]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().harvests, 1);
    }

    #[tokio::test]
    async fn test_staking_weeks_filter_by_account() {
        let store = Store::open(&scratch_db("staking")).await.unwrap();
        store
            .import_staking_weeks(&[
                staking_week("0xAA", 1),
                staking_week("0xAA", 2),
                staking_week("0xbb", 2),
            ])
            .await
            .unwrap();

        let all = store.get_staking_weeks(None, 0, 20).await.unwrap();
        assert_eq!(all.total, 3);

        let mine = store.get_staking_weeks(Some("0xaa"), 0, 20).await.unwrap();
        assert_eq!(mine.total, 2);
        assert_eq!(mine.items[0].week_number, 2);
        assert_eq!(mine.items[0].start_block, Some(20_000_002));
        assert_eq!(mine.items[0].end_block, None);
    }

    #[tokio::test]
    async fn test_block_timestamps_roundtrip() {
        let path = scratch_db("timestamps");
        let memo = HashMap::from([(0u64, 1_438_269_973i64), (18_000_000, 1_693_066_895)]);

        {
            let store = Store::open(&path).await.unwrap();
            store.store_block_timestamps(&memo).await.unwrap();
        }

        let store = Store::open(&path).await.unwrap();
        assert_eq!(store.get_block_timestamps().await.unwrap(), memo);
        assert_eq!(store.stats().await.unwrap().block_timestamps, 2);
    }
}

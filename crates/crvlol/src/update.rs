//! One update run: sample every series, refresh vault snapshots, persist
//!
//! The run holds the document's lock file for its whole duration. The new
//! document is assembled in memory and only swapped in once every section
//! succeeded, so a failed run leaves the previous document as it was.

use anyhow::Result;
use chrono::{DateTime, Utc};

use yield_core::{
    CacheDocument, ChainOracle, JsonRpcChain, Resolver, Retrying, RunLock, Sampler, WindowKind,
};

use crate::charts;
use crate::config::Config;
use crate::prices;
use crate::store::Store;

/// Which sections of the document to refresh
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    pub charts: bool,
    pub info: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            charts: true,
            info: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub series: Vec<(String, usize)>,
    pub snapshots: usize,
    pub chart_files: usize,
    pub charts_removed: usize,
    pub new_timestamps: usize,
}

/// Update against the configured archive node
pub async fn run_update(config: &Config, store: &Store, options: UpdateOptions) -> Result<UpdateSummary> {
    let chain = Retrying::new(JsonRpcChain::new(config.require_rpc_url()?), config.retry.clone());

    let reference_price = if options.info {
        let price =
            prices::fetch_price(&config.prices_api_base, &config.reference_token, &config.retry)
                .await?;
        tracing::info!(token = %config.reference_token, price, "reference price fetched");
        Some(price)
    } else {
        None
    };

    run(config, store, &chain, options, Utc::now(), reference_price).await
}

/// Update using `oracle`. `reference_price` is required when refreshing info.
pub async fn run<O: ChainOracle + ?Sized>(
    config: &Config,
    store: &Store,
    oracle: &O,
    options: UpdateOptions,
    now: DateTime<Utc>,
    reference_price: Option<f64>,
) -> Result<UpdateSummary> {
    let _lock = RunLock::acquire(&config.cache_path)?;
    let mut document = CacheDocument::load(&config.cache_path)?;

    let known = store.get_block_timestamps().await?;
    let known_count = known.len();
    let resolver = Resolver::with_known_timestamps(oracle, known);
    let mut sampler = Sampler::with_resolver(
        oracle,
        &config.registry,
        config.sampling.clone(),
        resolver,
    );

    let mut summary = UpdateSummary::default();
    let ts = now.timestamp();

    if options.charts {
        for kind in [WindowKind::Weekly, WindowKind::TrailingAnchors] {
            for adjust_for_peg in [false, true] {
                let series = sampler.apr_series(kind, ts, adjust_for_peg).await?;
                summary
                    .series
                    .push((charts::chart_name(kind, adjust_for_peg), series.len()));
                *document.chart_data.series_mut(kind, adjust_for_peg) = series;
            }
        }
        document.chart_data.last_updated = Some(now);
    }

    if options.info {
        let price = reference_price
            .ok_or_else(|| anyhow::anyhow!("A reference price is required to refresh vault info"))?;
        document.ll_data = sampler.vault_snapshots(price, ts).await?;
        summary.snapshots = document.ll_data.len();
    }

    document.last_updated = Some(now);
    document.save_atomic(&config.cache_path)?;
    tracing::info!(path = %config.cache_path.display(), "cache document updated");

    if options.charts {
        for kind in [WindowKind::Weekly, WindowKind::TrailingAnchors] {
            for adjust_for_peg in [false, true] {
                let chart = charts::build_chart(
                    kind,
                    adjust_for_peg,
                    document.chart_data.series(kind, adjust_for_peg),
                    &config.registry,
                    now,
                );
                charts::write_chart(&config.charts_dir, &chart)?;
                summary.chart_files += 1;
            }
        }
        summary.charts_removed = charts::cleanup_old_charts(
            &config.charts_dir,
            config.chart_retention_days,
            now.date_naive(),
        )?;
    }

    let timestamps = sampler.resolver().known_timestamps();
    summary.new_timestamps = timestamps.len().saturating_sub(known_count);
    store.store_block_timestamps(timestamps).await?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethabi::{Token, Uint};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use yield_core::{Address, YieldError};

    use crate::config::FileConfig;

    const HOUR: i64 = 3600;
    const WEEK: i64 = 7 * 24 * HOUR;

    /// Hourly blocks over 15 weeks; every vault view returns small constants
    struct StubChain {
        broken: AtomicBool,
    }

    impl StubChain {
        fn new() -> Self {
            Self {
                broken: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ChainOracle for StubChain {
        async fn current_height(&self) -> yield_core::Result<u64> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(YieldError::Decode {
                    what: "eth_blockNumber".to_string(),
                    message: "node is broken".to_string(),
                });
            }
            Ok(15 * 168)
        }

        async fn timestamp_at(&self, height: u64) -> yield_core::Result<i64> {
            Ok(height as i64 * HOUR)
        }

        async fn call(&self, _to: Address, data: Vec<u8>, block: u64) -> yield_core::Result<Vec<u8>> {
            let tuple_methods = [
                yield_core::abi::encode_call("feeInfo", &[], &[]),
                yield_core::abi::encode_call("rewardInfo", &[], &[]),
            ];
            let value = Token::Uint(Uint::from(1_000_000_000_000_000_000u64 + block));
            if tuple_methods.iter().any(|m| data.starts_with(m)) {
                Ok(ethabi::encode(&[
                    Token::Address(Address::zero()),
                    Token::Uint(Uint::from(5_000_000u64)),
                    Token::Uint(Uint::from(86_400u64)),
                    Token::Uint(Uint::zero()),
                ]))
            } else {
                Ok(ethabi::encode(&[value]))
            }
        }
    }

    async fn setup(name: &str) -> (Config, Store, PathBuf) {
        let dir = std::env::temp_dir().join(format!("crvlol-update-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::from_file(&FileConfig::default(), None, Some(dir.join("data"))).unwrap();
        config.charts_dir = dir.join("charts");
        let store = Store::open(&config.database_path()).await.unwrap();
        (config, store, dir)
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(15 * WEEK, 0).unwrap()
    }

    #[tokio::test]
    async fn test_full_run_writes_document_and_charts() {
        let (config, store, _dir) = setup("full").await;
        let chain = StubChain::new();

        let summary = run(&config, &store, &chain, UpdateOptions::default(), now(), Some(0.5))
            .await
            .unwrap();

        assert_eq!(summary.series.len(), 4);
        assert!(summary.series.iter().all(|(_, n)| *n == 13));
        assert_eq!(summary.snapshots, 3);
        assert_eq!(summary.chart_files, 4);
        assert!(summary.new_timestamps > 0);

        let document = CacheDocument::load(&config.cache_path).unwrap();
        assert_eq!(document.chart_data.weekly_aprs.len(), 13);
        assert_eq!(document.chart_data.apr_since_peg.len(), 13);
        assert_eq!(document.ll_data.len(), 3);
        assert_eq!(document.last_updated, Some(now()));

        assert!(
            charts::latest_chart(&config.charts_dir, WindowKind::Weekly, true)
                .unwrap()
                .is_some()
        );
        assert!(RunLock::acquire(&config.cache_path).is_ok());

        // Second run resolves from the persisted memo
        let again = run(&config, &store, &chain, UpdateOptions::default(), now(), Some(0.5))
            .await
            .unwrap();
        assert_eq!(again.new_timestamps, 0);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_previous_document() {
        let (config, store, _dir) = setup("failed").await;
        let chain = StubChain::new();
        let charts_only = UpdateOptions {
            charts: true,
            info: false,
        };

        run(&config, &store, &chain, charts_only, now(), None).await.unwrap();
        let before = std::fs::read_to_string(&config.cache_path).unwrap();

        chain.broken.store(true, Ordering::SeqCst);
        let later = DateTime::from_timestamp(15 * WEEK + 60, 0).unwrap();
        assert!(run(&config, &store, &chain, charts_only, later, None).await.is_err());

        assert_eq!(std::fs::read_to_string(&config.cache_path).unwrap(), before);
        // Lock released even on failure
        assert!(RunLock::acquire(&config.cache_path).is_ok());
    }

    #[tokio::test]
    async fn test_run_over_document_with_unix_last_updated() {
        let (config, store, _dir) = setup("unix-ts").await;
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(&config.cache_path, r#"{"ll_data": {}, "last_updated": 1700000100}"#).unwrap();

        let chain = StubChain::new();
        let charts_only = UpdateOptions {
            charts: true,
            info: false,
        };
        run(&config, &store, &chain, charts_only, now(), None).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config.cache_path).unwrap()).unwrap();
        assert_eq!(raw["last_updated"], now().timestamp());
        assert_eq!(raw["chart_data"]["last_updated"], now().timestamp());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let (config, store, _dir) = setup("concurrent").await;
        let chain = StubChain::new();

        let _held = RunLock::acquire(&config.cache_path).unwrap();
        let err = run(&config, &store, &chain, UpdateOptions::default(), now(), Some(1.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<YieldError>(),
            Some(YieldError::RunInProgress(_))
        ));
        assert!(!config.cache_path.exists());
    }

    #[tokio::test]
    async fn test_info_without_price_fails_before_writing() {
        let (config, store, _dir) = setup("no-price").await;
        let chain = StubChain::new();
        let info_only = UpdateOptions {
            charts: false,
            info: true,
        };
        assert!(run(&config, &store, &chain, info_only, now(), None).await.is_err());
        assert!(!config.cache_path.exists());
    }
}

//! Configuration for the liquid locker tracker
//!
//! Every section of config.toml is optional; a missing file means defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use yield_core::readers::DEFAULT_PEG_NOTIONAL;
use yield_core::vaults::VaultEntry;
use yield_core::{RetryPolicy, SamplerSettings, VaultRegistry};

use crate::constants;

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub prices: PricesConfig,
    /// Overrides the built-in vault registry when non-empty
    #[serde(default)]
    pub vaults: Vec<VaultEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChainConfig {
    /// Archive node JSON-RPC endpoint
    #[serde(default)]
    pub rpc_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// First backoff delay, doubled on each further attempt
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub weekly_buckets: usize,
    pub weekly_margin_secs: i64,
    pub head_margin_secs: i64,
    pub chart_trailing_weeks: u64,
    pub snapshot_days: Vec<u64>,
    pub peg_notional: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            weekly_buckets: SamplerSettings::default().weekly_buckets,
            weekly_margin_secs: constants::DEFAULT_WEEKLY_MARGIN_SECS,
            head_margin_secs: constants::DEFAULT_HEAD_MARGIN_SECS,
            chart_trailing_weeks: constants::DEFAULT_CHART_TRAILING_WEEKS,
            snapshot_days: constants::DEFAULT_SNAPSHOT_DAYS.to_vec(),
            peg_notional: DEFAULT_PEG_NOTIONAL,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// Cache document file name, relative to `data_dir`
    pub cache_file: String,
    pub charts_dir: PathBuf,
    pub chart_retention_days: i64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            cache_file: constants::DEFAULT_CACHE_FILE.to_string(),
            charts_dir: PathBuf::from(constants::DEFAULT_CHARTS_DIR),
            chart_retention_days: constants::DEFAULT_CHART_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: constants::DEFAULT_BIND.to_string(),
            port: constants::DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    /// Token whose USD price turns a peg into a price
    pub reference_token: String,
    pub api_base: String,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            reference_token: constants::CRV_TOKEN.to_string(),
            api_base: constants::DEFILLAMA_API_BASE.to_string(),
        }
    }
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| {
            format!(
                "Failed to parse {}. Check for:\n\
                 - Invalid TOML syntax (missing quotes, brackets, etc.)\n\
                 - Incorrect data types (strings vs numbers)\n\
                 - Incomplete [[vaults]] entries\n\n\
                 See config.toml.example for the expected format.",
                path.display()
            )
        })
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Main configuration struct with parsed values
pub struct Config {
    /// Archive node endpoint, required by commands that read the chain
    pub rpc_url: Option<String>,
    pub retry: RetryPolicy,
    pub sampling: SamplerSettings,
    pub data_dir: PathBuf,
    /// Full path of the cache document
    pub cache_path: PathBuf,
    pub charts_dir: PathBuf,
    pub chart_retention_days: i64,
    pub bind: String,
    pub port: u16,
    pub reference_token: String,
    pub prices_api_base: String,
    pub registry: VaultRegistry,
}

impl Config {
    /// Create config from file config and command-line overrides
    pub fn from_file(
        file_config: &FileConfig,
        rpc_url: Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let sampling = &file_config.sampling;
        let paths = &file_config.paths;

        let registry = if file_config.vaults.is_empty() {
            VaultRegistry::curve_liquid_lockers()?
        } else {
            VaultRegistry::from_entries(&file_config.vaults)?
        };

        let data_dir = data_dir.unwrap_or_else(|| paths.data_dir.clone());
        let cache_path = data_dir.join(&paths.cache_file);

        Ok(Self {
            rpc_url: rpc_url.or_else(|| file_config.chain.rpc_url.clone()),
            retry: RetryPolicy {
                max_attempts: file_config.retry.max_attempts.max(1),
                base_delay: Duration::from_millis(file_config.retry.base_delay_ms),
            },
            sampling: SamplerSettings {
                weekly_buckets: sampling.weekly_buckets,
                weekly_margin_secs: sampling.weekly_margin_secs,
                head_margin_secs: sampling.head_margin_secs,
                chart_trailing_days: (1..=sampling.chart_trailing_weeks).map(|w| w * 7).collect(),
                snapshot_days: sampling.snapshot_days.clone(),
                peg_notional: sampling.peg_notional,
            },
            data_dir,
            cache_path,
            charts_dir: paths.charts_dir.clone(),
            chart_retention_days: paths.chart_retention_days,
            bind: file_config.server.bind.clone(),
            port: file_config.server.port,
            reference_token: file_config.prices.reference_token.clone(),
            prices_api_base: file_config.prices.api_base.clone(),
            registry,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(constants::DATABASE_FILENAME)
    }

    pub fn require_rpc_url(&self) -> Result<&str> {
        self.rpc_url.as_deref().with_context(|| {
            "No RPC endpoint configured. Set [chain] rpc_url in config.toml or pass --rpc-url"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yield_core::YieldError;

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = FileConfig::parse("").unwrap();
        let config = Config::from_file(&file, None, None).unwrap();

        assert!(config.rpc_url.is_none());
        assert!(config.require_rpc_url().is_err());
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.sampling.weekly_buckets, 13);
        assert_eq!(config.sampling.head_margin_secs, 1000);
        assert_eq!(config.sampling.chart_trailing_days.len(), 13);
        assert_eq!(config.sampling.chart_trailing_days[0], 7);
        assert_eq!(config.sampling.chart_trailing_days[12], 91);
        assert_eq!(config.sampling.snapshot_days, vec![30, 60, 90]);
        assert_eq!(config.cache_path, PathBuf::from("./data/ll_info.json"));
        assert_eq!(config.port, 5000);
        assert_eq!(config.registry.len(), 3);
    }

    #[test]
    fn test_sections_and_overrides() {
        let file = FileConfig::parse(
            r#"
            [chain]
            rpc_url = "http://archive.local:8545"

            [retry]
            max_attempts = 6

            [sampling]
            snapshot_days = [7]

            [paths]
            data_dir = "/var/lib/crvlol"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        let config = Config::from_file(&file, None, None).unwrap();
        assert_eq!(config.require_rpc_url().unwrap(), "http://archive.local:8545");
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.sampling.snapshot_days, vec![7]);
        assert_eq!(config.sampling.weekly_margin_secs, 5);
        assert_eq!(config.cache_path, PathBuf::from("/var/lib/crvlol/ll_info.json"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, "0.0.0.0");

        let overridden = Config::from_file(
            &file,
            Some("http://other:8545".to_string()),
            Some(PathBuf::from("/tmp/data")),
        )
        .unwrap();
        assert_eq!(overridden.require_rpc_url().unwrap(), "http://other:8545");
        assert_eq!(overridden.database_path(), PathBuf::from("/tmp/data/crvlol.db"));
    }

    #[test]
    fn test_custom_vaults_replace_registry() {
        let file = FileConfig::parse(
            r#"
            [[vaults]]
            address = "0x27B5739e22ad9033bcBf192059122d163b60349D"
            name = "Staked Yearn CRV"
            symbol = "yvyCRV"
            underlying = "0xFCc5c47bE19d06BF83eB04298b026F81069ff65b"
            pool = "0x99f5aCc8EC2Da2BC0771c32814EFF52b712de1E5"
            color = "blue"
            strategy = "price_per_share_field"
            "#,
        )
        .unwrap();
        let config = Config::from_file(&file, None, None).unwrap();
        assert_eq!(config.registry.symbols(), vec!["yvyCRV"]);
    }

    #[test]
    fn test_unknown_strategy_fails_at_startup() {
        let file = FileConfig::parse(
            r#"
            [[vaults]]
            address = "0x27B5739e22ad9033bcBf192059122d163b60349D"
            name = "Staked Yearn CRV"
            symbol = "yvyCRV"
            underlying = "0xFCc5c47bE19d06BF83eB04298b026F81069ff65b"
            pool = "0x99f5aCc8EC2Da2BC0771c32814EFF52b712de1E5"
            color = "blue"
            strategy = "vibes"
            "#,
        )
        .unwrap();
        let err = Config::from_file(&file, None, None).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<YieldError>(),
            Some(YieldError::UnknownVaultStrategy { .. })
        ));
    }
}

//! Centralized constants for the liquid locker tracker
//!
//! Deployment-specific values (RPC endpoint, vault list) come from config.toml.

// =============================================================================
// API Endpoints
// =============================================================================

/// DefiLlama coins API base URL
pub const DEFILLAMA_API_BASE: &str = "https://coins.llama.fi";

/// How far back DefiLlama may look for a "current" price
pub const DEFILLAMA_SEARCH_WIDTH: &str = "40h";

// =============================================================================
// Tokens
// =============================================================================

/// CRV on Ethereum mainnet, the token every locker is pegged against
pub const CRV_TOKEN: &str = "0xD533a949740bb3306d119CC777fa900bA034cd52";

// =============================================================================
// Sampling Defaults
// =============================================================================

pub const DEFAULT_WEEKLY_MARGIN_SECS: i64 = 5;

pub const DEFAULT_HEAD_MARGIN_SECS: i64 = 1000;

/// Trailing chart reaches back this many weeks, one point per week
pub const DEFAULT_CHART_TRAILING_WEEKS: u64 = 13;

pub const DEFAULT_SNAPSHOT_DAYS: [u64; 3] = [30, 60, 90];

// =============================================================================
// Charts
// =============================================================================

pub const CHART_X_LABEL: &str = "Date";

pub const CHART_Y_LABEL: &str = "% APR";

/// Default y-axis range in percent
pub const CHART_Y_DOMAIN: [f64; 2] = [0.0, 70.0];

/// Chart files older than this are removed after each run
pub const DEFAULT_CHART_RETENTION_DAYS: i64 = 10;

/// Vertical markers drawn on every chart (unix timestamp, label)
pub const CHART_EVENTS: &[(i64, &str)] = &[
    (1_718_236_800, "YBS migration week"),
    (1_718_841_600, "YBS double rewards week start"),
];

// =============================================================================
// File Names
// =============================================================================

/// Default config file path
pub const CONFIG_FILE: &str = "config.toml";

/// SQLite database (harvests, staking weeks, block timestamps)
pub const DATABASE_FILENAME: &str = "crvlol.db";

pub const DEFAULT_DATA_DIR: &str = "./data";

pub const DEFAULT_CACHE_FILE: &str = "ll_info.json";

pub const DEFAULT_CHARTS_DIR: &str = "./charts";

// =============================================================================
// HTTP API
// =============================================================================

pub const DEFAULT_BIND: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 5000;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

pub const MAX_PAGE_SIZE: u32 = 100;

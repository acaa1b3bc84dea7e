//! Compounder harvest records
//!
//! Harvests are imported from CSV exports of the compounders' harvest events
//! and served newest first by the API.

use anyhow::{Result, bail};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Date format shown next to each harvest
const DATE_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

/// One harvest event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Harvest {
    /// Database ID (None for harvests not yet saved)
    #[serde(default, skip_deserializing)]
    pub id: Option<i64>,
    /// Profit in underlying units, kept as decimal text to preserve precision
    pub profit: String,
    pub timestamp: i64,
    pub name: String,
    pub underlying: String,
    pub compounder: String,
    pub block: u64,
    pub txn_hash: String,
    #[serde(default)]
    pub date_str: String,
}

/// Load harvests from a CSV file
pub fn load_from_csv(path: &Path) -> Result<Vec<Harvest>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut harvests = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let mut harvest: Harvest = result?;
        harvest.id = None;
        harvest.profit = harvest.profit.trim().to_string();
        if !is_decimal(&harvest.profit) {
            bail!(
                "Row {}: profit '{}' is not a decimal number",
                line + 1,
                harvest.profit
            );
        }
        if harvest.date_str.is_empty() {
            harvest.date_str = date_string(harvest.timestamp);
        }
        harvests.push(harvest);
    }
    Ok(harvests)
}

/// Plain decimal: optional sign, digits, at most one point
fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();

    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    match frac {
        None => !whole.is_empty() && all_digits(whole),
        Some(frac) => {
            (!whole.is_empty() || !frac.is_empty()) && all_digits(whole) && all_digits(frac)
        }
    }
}

pub fn date_string(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

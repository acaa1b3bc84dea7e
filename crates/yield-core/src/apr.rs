//! Annualized rates from two point-in-time samples
//!
//! Rates are simple linear extrapolations of the observed growth to a 365-day
//! year, not compounded IRRs. Peg drift over the same window is annualized
//! the same way and added to the share-price rate.

use serde::{Deserialize, Serialize};

use crate::resolver::DAY;

/// Fixed 365-day year, no leap-year adjustment
pub const SECONDS_PER_YEAR: i64 = 365 * DAY;

/// A vault observation at one block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub block: u64,
    pub timestamp: i64,
    pub pps: f64,
    pub peg: f64,
}

/// `(end - start) / start`, scaled to a year. Zero start or zero elapsed is 0.
pub fn linear_rate(start: f64, end: f64, elapsed_seconds: i64) -> f64 {
    if start == 0.0 || elapsed_seconds <= 0 {
        return 0.0;
    }
    let years = elapsed_seconds as f64 / SECONDS_PER_YEAR as f64;
    (end - start) / start / years
}

/// Annualized peg drift between two samples
pub fn peg_drift(start: &Sample, end: &Sample, elapsed_seconds: i64) -> f64 {
    linear_rate(start.peg, end.peg, elapsed_seconds)
}

/// APR of the share price between `start` and `end`, optionally plus peg drift
pub fn annualize(start: &Sample, end: &Sample, elapsed_seconds: i64, adjust_for_peg: bool) -> f64 {
    let base = linear_rate(start.pps, end.pps, elapsed_seconds);
    if adjust_for_peg {
        base + peg_drift(start, end, elapsed_seconds)
    } else {
        base
    }
}

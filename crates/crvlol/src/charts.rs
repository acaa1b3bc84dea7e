//! Chart files for the web viewer
//!
//! Each series is written to `<charts_dir>/<Title>_<True|False>_<YYYY-MM-DD>.json`
//! once per run, and files older than the retention window are removed.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use yield_core::{AprObservation, VaultRegistry, WindowKind};

use crate::constants;

const FILE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartFile {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub y_domain: [f64; 2],
    /// Line colour per vault symbol
    pub colors: BTreeMap<String, String>,
    pub points: Vec<ChartPoint>,
    pub events: Vec<ChartEvent>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: DateTime<Utc>,
    pub symbol: String,
    /// Percent
    pub apr: f64,
}

/// Vertical marker for a notable protocol event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEvent {
    pub date: DateTime<Utc>,
    pub label: String,
}

/// `Weekly_APRs_True`, `APR_Since_False`, ...
pub fn chart_name(kind: WindowKind, adjust_for_peg: bool) -> String {
    format!("{}_{}", kind.title(), peg_label(adjust_for_peg))
}

fn peg_label(adjust_for_peg: bool) -> &'static str {
    if adjust_for_peg { "True" } else { "False" }
}

/// Route parameter to peg flag; anything but "true" means unadjusted
pub fn parse_peg(peg: &str) -> bool {
    peg.eq_ignore_ascii_case("true")
}

/// Flatten a series into one point per vault per observation
pub fn build_chart(
    kind: WindowKind,
    adjust_for_peg: bool,
    observations: &[AprObservation],
    registry: &VaultRegistry,
    generated_at: DateTime<Utc>,
) -> ChartFile {
    let points = observations
        .iter()
        .flat_map(|o| {
            registry.iter().filter_map(move |vault| {
                o.aprs.get(&vault.symbol).map(|apr| ChartPoint {
                    date: o.date,
                    symbol: vault.symbol.clone(),
                    apr: *apr,
                })
            })
        })
        .collect();

    let events = constants::CHART_EVENTS
        .iter()
        .filter_map(|(ts, label)| {
            DateTime::from_timestamp(*ts, 0).map(|date| ChartEvent {
                date,
                label: label.to_string(),
            })
        })
        .collect();

    ChartFile {
        title: chart_name(kind, adjust_for_peg),
        x_label: constants::CHART_X_LABEL.to_string(),
        y_label: constants::CHART_Y_LABEL.to_string(),
        y_domain: constants::CHART_Y_DOMAIN,
        colors: registry
            .iter()
            .map(|v| (v.symbol.clone(), v.color.clone()))
            .collect(),
        points,
        events,
        generated_at,
    }
}

/// Write `chart` dated by its generation day, replacing an earlier file from the same day
pub fn write_chart(dir: &Path, chart: &ChartFile) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let date = chart.generated_at.format(FILE_DATE_FORMAT);
    let path = dir.join(format!("{}_{}.json", chart.title, date));
    std::fs::write(&path, serde_json::to_vec_pretty(chart)?)?;
    Ok(path)
}

/// Date suffix of a chart file named `<name>_<YYYY-MM-DD>.json`
fn file_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(".json")?;
    let (_, date) = stem.rsplit_once('_')?;
    NaiveDate::parse_from_str(date, FILE_DATE_FORMAT).ok()
}

/// Chart files in `dir` whose name starts with `prefix`, with their dates
fn dated_files(dir: &Path, prefix: &str) -> Result<Vec<(NaiveDate, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        if let Some(date) = file_date(name) {
            files.push((date, path));
        }
    }
    Ok(files)
}

/// Most recent file for one series
pub fn latest_chart(dir: &Path, kind: WindowKind, adjust_for_peg: bool) -> Result<Option<PathBuf>> {
    let prefix = format!("{}_", chart_name(kind, adjust_for_peg));
    let latest = dated_files(dir, &prefix)?
        .into_iter()
        .max_by_key(|(date, _)| *date)
        .map(|(_, path)| path);
    Ok(latest)
}

/// Remove chart files dated more than `retention_days` before `today`
pub fn cleanup_old_charts(dir: &Path, retention_days: i64, today: NaiveDate) -> Result<usize> {
    let threshold = today - Duration::days(retention_days);
    let mut removed = 0;
    for (date, path) in dated_files(dir, "")? {
        if date < threshold {
            std::fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "removed old chart");
            removed += 1;
        }
    }
    Ok(removed)
}

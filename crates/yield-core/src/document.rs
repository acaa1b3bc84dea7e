//! The persisted cache document
//!
//! One JSON file holds the latest chart series and vault snapshots. Runs are
//! serialized with an advisory lock on a file next to the document, and the
//! document is only replaced by a rename once every section has been computed,
//! so a failed run leaves the previous document untouched. Top-level keys this
//! module does not know about are carried through unchanged.

use chrono::serde::ts_seconds_option;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, YieldError};
use crate::sampler::{AprObservation, VaultSnapshot, WindowKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub weekly_aprs: Vec<AprObservation>,
    #[serde(default)]
    pub weekly_aprs_peg: Vec<AprObservation>,
    #[serde(default)]
    pub apr_since: Vec<AprObservation>,
    #[serde(default)]
    pub apr_since_peg: Vec<AprObservation>,
    /// Unix seconds on the wire
    #[serde(default, with = "ts_seconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ChartData {
    pub fn series(&self, kind: WindowKind, adjust_for_peg: bool) -> &[AprObservation] {
        match (kind, adjust_for_peg) {
            (WindowKind::Weekly, false) => &self.weekly_aprs,
            (WindowKind::Weekly, true) => &self.weekly_aprs_peg,
            (WindowKind::TrailingAnchors, false) => &self.apr_since,
            (WindowKind::TrailingAnchors, true) => &self.apr_since_peg,
        }
    }

    pub fn series_mut(&mut self, kind: WindowKind, adjust_for_peg: bool) -> &mut Vec<AprObservation> {
        match (kind, adjust_for_peg) {
            (WindowKind::Weekly, false) => &mut self.weekly_aprs,
            (WindowKind::Weekly, true) => &mut self.weekly_aprs_peg,
            (WindowKind::TrailingAnchors, false) => &mut self.apr_since,
            (WindowKind::TrailingAnchors, true) => &mut self.apr_since_peg,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub chart_data: ChartData,
    /// Vault snapshots keyed by vault address
    #[serde(default)]
    pub ll_data: BTreeMap<String, VaultSnapshot>,
    /// Unix seconds on the wire
    #[serde(default, with = "ts_seconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CacheDocument {
    /// Read the document at `path`; a missing file is an empty document
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file and rename it over `path`
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = sibling(path, "tmp");
        let json = serde_json::to_vec_pretty(self)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), bytes = json.len(), "cache document written");
        Ok(())
    }
}

/// `<path>.<suffix>` without replacing the existing extension
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive claim on an update run.
///
/// Held as an OS advisory lock on `<document>.lock`, so the claim ends with the
/// process even when it is killed. The file itself stays behind and only records
/// the pid of the last holder.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Take the lock for the document at `document_path`.
    /// Fails with [`YieldError::RunInProgress`] if a live run holds it.
    pub fn acquire(document_path: &Path) -> Result<Self> {
        let path = sibling(document_path, "lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(YieldError::RunInProgress(path.display().to_string()));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    // Unlock only. The lock file must stay the same inode for every opener.
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

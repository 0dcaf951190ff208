//! Fingerprint cache storage
//!
//! Persists one JSON entry per input set. Entries are written to a temporary
//! file in the cache directory and renamed into place, so a reader never sees
//! a half-written entry. Every failure degrades to a miss or a logged warning.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::fingerprint::{input_set_key, Fingerprint};
use crate::models::TestResult;

/// Persisted cache record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Combined content digest (hex)
    pub fingerprint: String,

    /// Per-input content digests
    pub files: BTreeMap<String, String>,

    /// When the entry was written
    pub timestamp: DateTime<Utc>,

    /// Cached workload result
    pub result: TestResult,
}

/// Why a lookup did not produce a usable entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MissReason {
    /// Caller asked to bypass the cache
    Forced,
    /// No entry stored for this input set
    NoEntry,
    /// An input could not be read while fingerprinting
    InputsUnreadable(String),
    /// Inputs changed since the entry was written
    Changed,
    /// Entry could not be read or parsed
    Corrupt(String),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::Forced => write!(f, "cache bypass requested"),
            MissReason::NoEntry => write!(f, "no cache entry"),
            MissReason::InputsUnreadable(e) => write!(f, "inputs unreadable: {e}"),
            MissReason::Changed => write!(f, "inputs changed"),
            MissReason::Corrupt(e) => write!(f, "corrupt entry: {e}"),
        }
    }
}

/// Outcome of a cache lookup
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
    Hit(Box<CacheEntry>),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Brief entry information for listings
#[derive(Clone, Debug)]
pub struct CacheEntryInfo {
    pub path: PathBuf,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: usize,
    pub total: usize,
    pub failed: usize,
}

/// Content-addressed cache of test results
#[derive(Clone, Debug)]
pub struct FingerprintCache {
    dir: PathBuf,
    force_invalidate: bool,
}

impl FingerprintCache {
    /// Create a cache rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            force_invalidate: false,
        }
    }

    /// Default per-user cache directory
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("test-orchestrator")
            .join("fingerprints")
    }

    /// Make every lookup miss without touching storage
    pub fn with_forced_invalidation(mut self, force: bool) -> Self {
        self.force_invalidate = force;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry belonging to an input set
    pub fn entry_path(&self, inputs: &[PathBuf]) -> PathBuf {
        self.dir.join(format!("{}.json", input_set_key(inputs)))
    }

    /// Look up a cached result for the current contents of `inputs`.
    ///
    /// Never fails: unreadable inputs, absent or corrupt entries and changed
    /// contents are all reported as a miss.
    pub fn lookup(&self, inputs: &[PathBuf]) -> CacheLookup {
        if self.force_invalidate {
            return CacheLookup::Miss(MissReason::Forced);
        }

        let path = self.entry_path(inputs);
        if !path.exists() {
            return CacheLookup::Miss(MissReason::NoEntry);
        }

        let entry = match read_entry(&path) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {:#}", path.display(), e);
                return CacheLookup::Miss(MissReason::Corrupt(format!("{e:#}")));
            }
        };

        if let Err(e) = entry.result.validate() {
            warn!("Ignoring inconsistent cache entry {}: {}", path.display(), e);
            return CacheLookup::Miss(MissReason::Corrupt(e.to_string()));
        }

        let current = match Fingerprint::compute(inputs) {
            Ok(fp) => fp,
            Err(e) => {
                debug!("Cannot fingerprint inputs: {:#}", e);
                return CacheLookup::Miss(MissReason::InputsUnreadable(format!("{e:#}")));
            }
        };

        if current.digest() != entry.fingerprint {
            debug!(
                "Fingerprint changed: cached={} current={}",
                entry.fingerprint,
                current.digest()
            );
            return CacheLookup::Miss(MissReason::Changed);
        }

        debug!("Cache hit for {}", path.display());
        CacheLookup::Hit(Box::new(entry))
    }

    /// Store a result for the current contents of `inputs`.
    ///
    /// Returns whether the entry was persisted; failures are logged only.
    pub fn store(&self, inputs: &[PathBuf], result: &TestResult) -> bool {
        match self.try_store(inputs, result) {
            Ok(path) => {
                debug!("Cached result at {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to update fingerprint cache: {:#}", e);
                false
            }
        }
    }

    fn try_store(&self, inputs: &[PathBuf], result: &TestResult) -> Result<PathBuf> {
        let fingerprint = Fingerprint::compute(inputs)?;
        let entry = CacheEntry {
            fingerprint: fingerprint.digest().to_string(),
            files: fingerprint.into_files(),
            timestamp: Utc::now(),
            result: result.clone(),
        };

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;

        let path = self.entry_path(inputs);
        write_atomic(&self.dir, &path, &entry)?;
        Ok(path)
    }

    /// List all readable entries
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_entry(&path) {
                    Ok(entry) => entries.push(CacheEntryInfo {
                        path,
                        fingerprint: entry.fingerprint,
                        timestamp: entry.timestamp,
                        inputs: entry.files.len(),
                        total: entry.result.total,
                        failed: entry.result.failed,
                    }),
                    Err(e) => debug!("Skipping {}: {:#}", path.display(), e),
                }
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Remove every entry, returning how many were deleted
    pub fn clear(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }

        info!("Cleared {} cache entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry> {
    let content = fs::read_to_string(path).context("Failed to read cache entry")?;
    serde_json::from_str(&content).context("Failed to parse cache entry")
}

/// Serialize `value` as JSON into `path` via write-temp-then-rename
pub(crate) fn write_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).context("Failed to serialize entry")?;
        writer.flush().context("Failed to flush entry")?;
    }
    tmp.as_file().sync_all().context("Failed to sync entry")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move entry into place: {}", path.display()))?;
    Ok(())
}

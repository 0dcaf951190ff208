//! Content fingerprints for input file sets
//!
//! A fingerprint is derived from file contents only (never timestamps): every
//! input is hashed with SHA-256 and the per-file digests are combined in
//! path-sorted order.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Combined digest of a set of files plus the digest of each member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    digest: String,
    files: BTreeMap<String, String>,
}

impl Fingerprint {
    /// Hash every input and combine the results.
    ///
    /// Fails if any input cannot be read; duplicate paths are hashed once.
    pub fn compute(inputs: &[PathBuf]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in inputs {
            let key = path_key(path);
            if files.contains_key(&key) {
                continue;
            }
            let digest = hash_file(path)?;
            files.insert(key, digest);
        }

        Ok(Self::from_file_digests(files))
    }

    /// Combine already computed per-file digests
    pub fn from_file_digests(files: BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (path, digest) in &files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update(b"\n");
        }

        Self {
            digest: hex::encode(hasher.finalize()),
            files,
        }
    }

    /// Hex encoded combined digest
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Per-file digests keyed by path
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn into_files(self) -> BTreeMap<String, String> {
        self.files
    }
}

/// Stable identifier of an input set, independent of file contents.
///
/// Used to name the cache entry that belongs to a given set of paths.
pub fn input_set_key(inputs: &[PathBuf]) -> String {
    let mut keys: Vec<String> = inputs.iter().map(|p| path_key(p)).collect();
    keys.sort();
    keys.dedup();

    let mut hasher = Sha256::new();
    for key in &keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's contents, hex encoded
pub fn hash_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to read input: {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

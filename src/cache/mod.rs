//! Fingerprint cache
//!
//! Skips re-execution when the contents of a workload's inputs are unchanged.
//! The cache is advisory: concurrent runs may race on the same entry and the
//! last writer wins.

mod fingerprint;
mod store;

pub use fingerprint::{hash_file, input_set_key, Fingerprint};
pub use store::{CacheEntry, CacheEntryInfo, CacheLookup, FingerprintCache, MissReason};

pub(crate) use store::write_atomic;

//! Fingerprint-to-identity resolution.
//!
//! The parser and correlator only see [`FingerprintLookup`]; which store backs
//! it (an in-memory map loaded from a CSV or authorized-keys file, or the
//! SQLite registry in `sshlm-db`) is decided by the caller.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{MonitorError, RegistryError, Result};

/// Read side of the registry.
pub trait FingerprintLookup {
    /// Resolve a normalized fingerprint to its key owner, `None` when unknown.
    fn lookup(&self, fingerprint: &str) -> std::result::Result<Option<String>, RegistryError>;
}

/// Write side of the registry. Stores are last-write-wins.
pub trait FingerprintRegistry: FingerprintLookup {
    fn store(&self, fingerprint: &str, key_user: &str) -> std::result::Result<(), RegistryError>;

    fn contains(&self, fingerprint: &str) -> std::result::Result<bool, RegistryError> {
        Ok(self.lookup(fingerprint)?.is_some())
    }
}

/// Persisted read offsets for tailed files.
pub trait PositionStore {
    fn load_position(&self, path: &Path) -> std::result::Result<Option<u64>, RegistryError>;
    fn save_position(&self, path: &Path, offset: u64) -> std::result::Result<(), RegistryError>;
}

impl<T: FingerprintLookup + ?Sized> FingerprintLookup for &T {
    fn lookup(&self, fingerprint: &str) -> std::result::Result<Option<String>, RegistryError> {
        (**self).lookup(fingerprint)
    }
}

impl<T: FingerprintLookup + ?Sized> FingerprintLookup for Arc<T> {
    fn lookup(&self, fingerprint: &str) -> std::result::Result<Option<String>, RegistryError> {
        (**self).lookup(fingerprint)
    }
}

impl<T: FingerprintRegistry + ?Sized> FingerprintRegistry for &T {
    fn store(&self, fingerprint: &str, key_user: &str) -> std::result::Result<(), RegistryError> {
        (**self).store(fingerprint, key_user)
    }
}

impl<T: FingerprintRegistry + ?Sized> FingerprintRegistry for Arc<T> {
    fn store(&self, fingerprint: &str, key_user: &str) -> std::result::Result<(), RegistryError> {
        (**self).store(fingerprint, key_user)
    }
}

impl<T: PositionStore + ?Sized> PositionStore for &T {
    fn load_position(&self, path: &Path) -> std::result::Result<Option<u64>, RegistryError> {
        (**self).load_position(path)
    }

    fn save_position(&self, path: &Path, offset: u64) -> std::result::Result<(), RegistryError> {
        (**self).save_position(path, offset)
    }
}

impl<T: PositionStore + ?Sized> PositionStore for Arc<T> {
    fn load_position(&self, path: &Path) -> std::result::Result<Option<u64>, RegistryError> {
        (**self).load_position(path)
    }

    fn save_position(&self, path: &Path, offset: u64) -> std::result::Result<(), RegistryError> {
        (**self).save_position(path, offset)
    }
}

impl FingerprintLookup for HashMap<String, String> {
    fn lookup(&self, fingerprint: &str) -> std::result::Result<Option<String>, RegistryError> {
        Ok(self.get(normalize_fingerprint(fingerprint)).cloned())
    }
}

/// Strip the `SHA256:` prefix and base64 padding so fingerprints from logs,
/// `ssh-keygen -l` output and computed digests compare equal.
pub fn normalize_fingerprint(fingerprint: &str) -> &str {
    let fp = fingerprint.trim();
    let fp = fp.strip_prefix("SHA256:").unwrap_or(fp);
    fp.trim_end_matches('=')
}

/// Registry held in memory for the duration of one run.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `user,fingerprint` file.
    pub fn from_csv<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = HashMap::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (user, fingerprint) = match line.split_once(',') {
                Some((user, fp)) if !fp.trim().is_empty() => (user.trim(), fp),
                _ => {
                    return Err(MonitorError::MissingFingerprint {
                        line_number: idx + 1,
                    })
                }
            };

            let fingerprint = normalize_fingerprint(fingerprint).to_string();
            if entries.contains_key(&fingerprint) {
                return Err(MonitorError::DuplicateFingerprint(fingerprint));
            }
            entries.insert(fingerprint, user.to_string());
        }

        if entries.is_empty() {
            return Err(MonitorError::NoUsers);
        }

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FingerprintLookup for MemoryRegistry {
    fn lookup(&self, fingerprint: &str) -> std::result::Result<Option<String>, RegistryError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(normalize_fingerprint(fingerprint)).cloned())
    }
}

impl FingerprintRegistry for MemoryRegistry {
    fn store(&self, fingerprint: &str, key_user: &str) -> std::result::Result<(), RegistryError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        entries.insert(
            normalize_fingerprint(fingerprint).to_string(),
            key_user.to_string(),
        );
        Ok(())
    }
}

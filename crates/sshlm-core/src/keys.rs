//! Fill the registry from `authorized_keys` files.
//!
//! The comment field of each key is taken as the identity of its owner.

use std::fs::File;
use std::future::Future;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{MonitorError, Result};
use crate::registry::FingerprintRegistry;
use crate::tail::{channel_closed, is_write, watch_files, AppendReader};

/// One usable line of an `authorized_keys` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key_type: String,
    /// Unpadded base64 SHA-256 of the key blob, as sshd logs it after `SHA256:`.
    pub fingerprint: String,
    pub comment: String,
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-") || token.starts_with("sk-")
}

/// SHA-256 fingerprint of a raw public key blob.
pub fn fingerprint(blob: &[u8]) -> String {
    STANDARD_NO_PAD.encode(Sha256::digest(blob))
}

/// Parse a single `authorized_keys` line.
///
/// Blank lines, `#` comments and keys without a comment yield `None`.
pub fn parse_key_line(line: &str) -> Result<Option<KeyEntry>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let type_idx = tokens
        .iter()
        .position(|t| is_key_type(t))
        .ok_or_else(|| invalid_key("no key type found"))?;

    let key_type = tokens[type_idx];
    let encoded = tokens
        .get(type_idx + 1)
        .ok_or_else(|| invalid_key("missing key data"))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| invalid_key(format!("bad base64: {}", e)))?;

    let embedded = blob_key_type(&blob).ok_or_else(|| invalid_key("truncated key blob"))?;
    if embedded != key_type {
        return Err(invalid_key(format!(
            "key type {} does not match blob type {}",
            key_type, embedded
        )));
    }

    let fingerprint = fingerprint(&blob);
    let comment = tokens[type_idx + 2..].join(" ");
    if comment.is_empty() {
        tracing::warn!("empty comment, remove this fingerprint: SHA256:{}", fingerprint);
        return Ok(None);
    }

    Ok(Some(KeyEntry {
        key_type: key_type.to_string(),
        fingerprint,
        comment,
    }))
}

/// Parse a whole `authorized_keys` stream. A malformed key fails the parse.
pub fn parse_authorized_keys<R: BufRead>(reader: R) -> Result<Vec<KeyEntry>> {
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = parse_key_line(&line).map_err(|e| match e {
            MonitorError::InvalidKey { reason } => invalid_key(format!("line {}: {}", idx + 1, reason)),
            other => other,
        })?;
        if let Some(entry) = entry {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// Store one entry. Existing fingerprints are kept unless `update` is set.
/// Returns whether the registry was written.
pub fn store_entry<R>(registry: &R, entry: &KeyEntry, update: bool) -> Result<bool>
where
    R: FingerprintRegistry + ?Sized,
{
    if !update && registry.contains(&entry.fingerprint)? {
        return Ok(false);
    }

    tracing::info!("adding fingerprint for user {}", entry.comment);
    registry.store(&entry.fingerprint, &entry.comment)?;
    Ok(true)
}

/// Load every key from `paths` into the registry.
///
/// Missing files are reported and skipped. Returns the number of entries written.
pub fn collect_keys<R>(paths: &[PathBuf], registry: &R, update: bool) -> Result<usize>
where
    R: FingerprintRegistry + ?Sized,
{
    let mut written = 0;

    for path in paths {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("authorized keys file {} not found, skipping", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("adding keys from file: {}", path.display());
        let entries = parse_authorized_keys(BufReader::new(file))?;
        if entries.is_empty() {
            tracing::warn!("no usable keys in {}", path.display());
        }

        for entry in &entries {
            if store_entry(registry, entry, update)? {
                written += 1;
            }
        }
    }

    Ok(written)
}

/// Keeps the registry current as keys are appended to `authorized_keys` files.
pub struct KeyFollower<R> {
    files: Vec<AppendReader>,
    registry: R,
    update: bool,
}

impl<R: FingerprintRegistry> KeyFollower<R> {
    /// Start following `paths` from their current end. Missing files are skipped.
    pub fn attach(paths: &[PathBuf], registry: R, update: bool) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            match AppendReader::open_at_end(path) {
                Ok(reader) => files.push(reader),
                Err(MonitorError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("authorized keys file {} not found, not following", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            files,
            registry,
            update,
        })
    }

    /// Store keys appended since the last scan. Returns the number written.
    pub fn scan_appended(&mut self) -> Result<usize> {
        let registry = &self.registry;
        let update = self.update;
        let mut written = 0;

        for file in &mut self.files {
            let path = file.path().to_path_buf();
            file.read_complete_lines(|line, _| {
                match parse_key_line(line) {
                    Ok(Some(entry)) => {
                        tracing::info!("key was added to file: {}", path.display());
                        if store_entry(registry, &entry, update)? {
                            written += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(MonitorError::InvalidKey { reason }) => {
                        tracing::warn!("skipping key in {}: {}", path.display(), reason);
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            })?;
        }

        Ok(written)
    }

    /// Follow the files until `cancel` resolves.
    pub async fn run<C>(&mut self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        if self.files.is_empty() {
            cancel.await;
            return Ok(());
        }

        let paths: Vec<PathBuf> = self.files.iter().map(|f| f.path().to_path_buf()).collect();
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let (_watcher, mut rx) = watch_files(&refs)?;
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                _ = &mut cancel => return Ok(()),
                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        if is_write(&event) {
                            self.scan_appended()?;
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(channel_closed()),
                },
            }
        }
    }
}

fn blob_key_type(blob: &[u8]) -> Option<&str> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = blob.get(4..4usize.checked_add(len)?)?;
    std::str::from_utf8(name).ok()
}

fn invalid_key(reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidKey {
        reason: reason.into(),
    }
}

//! On-disk snapshot persistence
//!
//! Aggregator snapshots are written as JSON blobs keyed by the monitored
//! session file's path, enabling crash/restart resumption without replaying
//! the full session history. The blob is opaque and versioned; consumers
//! round-trip it through `EventAggregator::serialize`/`restore` and never
//! interpret it further.

use crate::config::Config;
use crate::error::{Error, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Derive the stable snapshot key for a monitored session file.
///
/// The key is the hex-truncated SHA-256 of the source path, so it stays
/// valid across restarts and never collides with path separators.
pub fn session_key(source_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.to_string_lossy().as_bytes());
    let hash = hasher.finalize();
    hex::encode(hash)[..16].to_string()
}

/// Path of the snapshot file for a monitored session.
pub fn snapshot_path(source_path: &Path) -> PathBuf {
    Config::snapshot_dir().join(format!("{}.json", session_key(source_path)))
}

/// Persist a serialized aggregator blob for this session.
pub fn save(source_path: &Path, blob: &Value) -> Result<()> {
    let path = snapshot_path(source_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let serialized = serde_json::to_vec(blob)?;

    // Write-then-rename so a crash mid-write never leaves a torn snapshot
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized)?;
    std::fs::rename(&tmp, &path)?;

    tracing::debug!(path = %path.display(), "snapshot saved");
    Ok(())
}

/// Load the serialized blob for this session, if one exists.
///
/// Returns `Ok(None)` when no snapshot has been written; a corrupt snapshot
/// file is an error so callers can decide to discard it.
pub fn load(source_path: &Path) -> Result<Option<Value>> {
    let path = snapshot_path(source_path);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(&path)?;
    let blob: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Snapshot(format!("corrupt snapshot {}: {}", path.display(), e)))?;
    Ok(Some(blob))
}

/// Remove the snapshot for this session, ignoring a missing file.
pub fn remove(source_path: &Path) -> Result<()> {
    let path = snapshot_path(source_path);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

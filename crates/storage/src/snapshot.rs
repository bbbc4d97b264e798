// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number. Recovery loads the snapshot and
//! replays WAL entries after that sequence. Content is zstd-compressed JSON.

use crate::state::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    BadVersion(u32),
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

/// Write a snapshot atomically: temp file, then rename over `path`. The
/// previous snapshot (if any) is rotated to a `.bak`.
pub fn save(
    path: &Path,
    state: &MaterializedState,
    seq: u64,
    created_at: DateTime<Utc>,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let snapshot = Snapshot {
        version: CURRENT_SNAPSHOT_VERSION,
        seq,
        state: state.clone(),
        created_at,
    };
    let json = serde_json::to_vec(&snapshot)?;
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &compressed)?;
    if path.exists() {
        let _ = fs::rename(path, rotate_bak_path(path));
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the snapshot at `path`, or `None` when no snapshot exists yet.
pub fn load(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let compressed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let json = zstd::decode_all(compressed.as_slice())?;
    let mut snapshot: Snapshot = serde_json::from_slice(&json)?;
    if snapshot.version != CURRENT_SNAPSHOT_VERSION {
        return Err(SnapshotError::BadVersion(snapshot.version));
    }
    snapshot.state.rebuild_indices();
    Ok(Some(snapshot))
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;

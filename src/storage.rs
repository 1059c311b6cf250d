// CLASSIFICATION: COMMUNITY
// Filename: storage.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-18

//! Copy-on-write storage driver over btrfs subvolumes.
//!
//! All four operations shell out to the `btrfs` tool through `sudo`; the
//! driver itself is stateless beyond the base path. Concurrent calls on the
//! same id are serialized by the backend manager's per-branch locks.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Errors reported by the storage driver.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage root is missing or not a directory.
    #[error("storage root unavailable: {0}")]
    Unavailable(String),
    /// Snapshot target already exists. Non-fatal; callers log and move on.
    #[error("snapshot {0} already exists")]
    SnapshotExists(String),
    /// The subvolume tool failed outright.
    #[error("subvolume operation failed: {0}")]
    Io(String),
}

/// Subvolume name of the snapshot taken from `source_id`.
pub fn snapshot_id(source_id: &str) -> String {
    format!("snap_{source_id}")
}

/// Driver bound to one storage root on a btrfs mount.
#[derive(Debug, Clone)]
pub struct BtrfsDriver {
    base: PathBuf,
}

impl BtrfsDriver {
    /// Create a driver over `base`. No filesystem access happens here.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Storage root this driver operates under.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Verify the storage root exists and is a directory.
    pub fn init(&self) -> Result<(), StorageError> {
        let meta = std::fs::metadata(&self.base)
            .map_err(|err| StorageError::Unavailable(format!("{}: {err}", self.base.display())))?;
        if !meta.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                self.base.display()
            )));
        }
        Ok(())
    }

    /// Take a read-only snapshot of `<base>/<source_id>` named
    /// `snap_<source_id>`.
    ///
    /// The tool has no create-if-absent mode; an existing target surfaces
    /// as [`StorageError::SnapshotExists`], which callers treat as success.
    pub fn create_snapshot(&self, source_id: &str) -> Result<String, StorageError> {
        let snapshot = snapshot_id(source_id);
        let src = self.base.join(source_id);
        let dst = self.base.join(&snapshot);
        if let Err(output) = run_btrfs(&["subvolume", "snapshot", "-r"], &src, &dst) {
            if reports_existing(&output) {
                return Err(StorageError::SnapshotExists(snapshot));
            }
            return Err(StorageError::Io(output));
        }
        Ok(snapshot)
    }

    /// Clone `snapshot_id` into a writable subvolume named `new_branch_id`
    /// and return its path.
    ///
    /// Idempotent: an existing destination is returned untouched. The clone
    /// is a metadata operation; no data is copied.
    pub fn clone_branch(
        &self,
        snapshot_id: &str,
        new_branch_id: &str,
    ) -> Result<PathBuf, StorageError> {
        let dst = self.base.join(new_branch_id);
        if dst.exists() {
            return Ok(dst);
        }
        let src = self.base.join(snapshot_id);
        run_btrfs(&["subvolume", "snapshot"], &src, &dst).map_err(StorageError::Io)?;
        Ok(dst)
    }

    /// Delete the subvolume at `<base>/<id>`.
    pub fn destroy(&self, id: &str) -> Result<(), StorageError> {
        let path = self.base.join(id);
        let output = Command::new("sudo")
            .arg("btrfs")
            .args(["subvolume", "delete"])
            .arg(&path)
            .output()
            .map_err(|err| StorageError::Io(format!("failed to invoke btrfs: {err}")))?;
        if !output.status.success() {
            return Err(StorageError::Io(combined_output(&output)));
        }
        Ok(())
    }
}

fn run_btrfs(subcommand: &[&str], src: &Path, dst: &Path) -> Result<(), String> {
    let output = Command::new("sudo")
        .arg("btrfs")
        .args(subcommand)
        .arg(src)
        .arg(dst)
        .output()
        .map_err(|err| format!("failed to invoke btrfs: {err}"))?;
    if !output.status.success() {
        return Err(combined_output(&output));
    }
    Ok(())
}

fn combined_output(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    text.trim().to_owned()
}

fn reports_existing(output: &str) -> bool {
    output.contains("File exists") || output.contains("already exists")
}

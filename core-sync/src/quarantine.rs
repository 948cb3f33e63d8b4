//! # Quarantine Store
//!
//! Takes ownership of raw capture files by moving them into a directory only
//! the upload queue writes to. Files there are named `<queue item id>.<ext>`
//! and live exactly as long as their queue record.

use bridge_traits::error::BridgeError;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_runtime::logging::strip_path;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::item::{MediaKind, QueueItemId};

/// A file the quarantine has taken ownership of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFile {
    pub id: QueueItemId,
    pub path: PathBuf,
}

pub struct QuarantineStore {
    root: PathBuf,
    fs: Arc<dyn FileSystemAccess>,
}

impl QuarantineStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystemAccess>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the quarantine directory if needed.
    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.root).await?;
        Ok(())
    }

    fn path_for(&self, id: &QueueItemId, kind: MediaKind) -> PathBuf {
        self.root.join(format!("{}.{}", id, kind.extension()))
    }

    /// Move `source` into quarantine under a fresh id.
    ///
    /// Tries a rename first and falls back to copy-then-delete when the
    /// rename fails (typically across devices). Fails with `FileMissing`
    /// if the source is gone.
    pub async fn intake(&self, source: &Path, kind: MediaKind) -> Result<OwnedFile> {
        if !self.fs.exists(source).await? {
            return Err(file_missing(source));
        }

        let id = QueueItemId::new();
        let dest = self.path_for(&id, kind);

        if !self.move_file(source, &dest).await? {
            // The capture must not exist in two places.
            if let Err(e) = self.fs.delete_file(&dest).await {
                warn!(queue_item_id = %id, error = %e, "Could not remove quarantined copy");
            }
            return Err(SyncError::Io(format!(
                "copied {} but could not remove the original",
                strip_path(&source.to_string_lossy())
            )));
        }
        debug!(queue_item_id = %id, "Capture file quarantined");

        Ok(OwnedFile { id, path: dest })
    }

    /// Hand a quarantined file back to `source` after a failed enqueue.
    ///
    /// If it cannot be moved back it is deleted so no orphan is left behind.
    pub async fn restore(&self, owned: &OwnedFile, source: &Path) -> Result<()> {
        match self.move_file(&owned.path, source).await {
            Ok(true) => {
                debug!(queue_item_id = %owned.id, "Capture file handed back to source");
                Ok(())
            }
            Ok(false) => {
                warn!(queue_item_id = %owned.id, "Capture handed back; retrying removal of quarantined copy");
                self.release(&owned.path).await
            }
            Err(e) => {
                warn!(
                    queue_item_id = %owned.id,
                    error = %e,
                    "Could not hand capture back; deleting quarantined copy"
                );
                self.release(&owned.path).await
            }
        }
    }

    /// Move `from` to `to`. Returns `false` when `to` holds a copy but `from`
    /// could not be removed.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<bool> {
        let rename_err = match self.fs.rename(from, to).await {
            Ok(()) => return Ok(true),
            Err(e) => e,
        };

        if is_not_found(&rename_err) {
            return Err(file_missing(from));
        }
        debug!(error = %rename_err, "Rename failed; falling back to copy");

        if let Err(e) = self.fs.copy_file(from, to).await {
            let _ = self.fs.delete_file(to).await;
            return Err(if is_not_found(&e) {
                file_missing(from)
            } else {
                e.into()
            });
        }

        match self.fs.delete_file(from).await {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Copied file but could not delete the original");
                Ok(false)
            }
        }
    }

    /// Whether `path` lies inside the quarantine directory.
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && !path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    }

    /// Whether `path` is a quarantined file that still exists.
    pub async fn contains(&self, path: &Path) -> Result<bool> {
        if !self.owns(path) {
            return Ok(false);
        }
        Ok(self.fs.exists(path).await?)
    }

    /// Read a quarantined file; `FileMissing` if it vanished.
    pub async fn read(&self, path: &Path) -> Result<Bytes> {
        match self.fs.read_file(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_not_found(&e) => Err(file_missing(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a quarantined file. A file that is already gone is not an error.
    pub async fn release(&self, path: &Path) -> Result<()> {
        if !self.owns(path) {
            return Err(SyncError::Validation(format!(
                "refusing to delete {} outside the quarantine directory",
                path.display()
            )));
        }

        match self.fs.delete_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete quarantined files no queue record references.
    ///
    /// Run before the first enqueue so an in-flight intake cannot be mistaken
    /// for an orphan.
    pub async fn sweep_orphans(&self, live: &HashSet<PathBuf>) -> Result<u64> {
        if !self.fs.exists(&self.root).await? {
            return Ok(0);
        }

        let mut removed = 0u64;
        for path in self.fs.list_directory(&self.root).await? {
            if live.contains(&path) {
                continue;
            }
            match self.fs.metadata(&path).await {
                Ok(meta) if meta.is_directory => continue,
                Ok(_) => {}
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e.into()),
            }

            match self.release(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, "Failed to remove orphaned capture"),
            }
        }

        if removed > 0 {
            info!(removed, "Removed orphaned quarantine files");
        }
        Ok(removed)
    }
}

/// Carries only the file name; the message reaches logs and user-visible status.
fn file_missing(path: &Path) -> SyncError {
    SyncError::FileMissing {
        path: strip_path(&path.to_string_lossy()).to_string(),
    }
}

fn is_not_found(err: &BridgeError) -> bool {
    matches!(err, BridgeError::Io(e) if e.kind() == ErrorKind::NotFound)
}

//! Bidirectional mapping between watch handles and directory paths.
//!
//! The table owns the notification source so that every registration and
//! removal goes through one place and the two indexes can never drift
//! apart from what the kernel holds.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::error::WatchError;
use super::mask::EventMask;
use super::source::NotificationSource;
use super::types::WatchHandle;

/// Watch set: which directories are watched, and under which handle.
///
/// Invariants: at most one entry per handle, at most one entry per path,
/// and `by_handle` and `by_path` always describe the same set of entries.
#[derive(Debug)]
pub struct WatchTable<S> {
    source: S,
    mask: EventMask,
    by_handle: HashMap<WatchHandle, PathBuf>,
    by_path: HashMap<PathBuf, WatchHandle>,
}

impl<S: NotificationSource> WatchTable<S> {
    /// Create an empty table registering watches with the default mask.
    pub fn new(source: S) -> Self {
        Self::with_mask(source, EventMask::directory_watch())
    }

    pub fn with_mask(source: S, mask: EventMask) -> Self {
        Self {
            source,
            mask,
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    /// Register a watch on `path` and record it.
    pub fn add(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        if self.by_path.contains_key(path) {
            return Err(WatchError::WatchCreation {
                path: path.to_path_buf(),
                reason: "already watched".to_string(),
            });
        }

        let handle = self
            .source
            .add_watch(path, self.mask)
            .map_err(|e| WatchError::WatchCreation {
                path: path.to_path_buf(),
                reason: describe_add_failure(&e),
            })?;

        // The kernel returns an existing handle when the same inode is
        // reachable through another path.
        if let Some(existing) = self.by_handle.get(&handle) {
            return Err(WatchError::WatchCreation {
                path: path.to_path_buf(),
                reason: format!("same directory already watched as {}", existing.display()),
            });
        }

        self.by_handle.insert(handle, path.to_path_buf());
        self.by_path.insert(path.to_path_buf(), handle);
        crate::debug_event!("table", "added", "{handle} {}", path.display());
        Ok(handle)
    }

    /// Deregister and drop the entry for `handle`. Absent handles are ignored.
    pub fn remove(&mut self, handle: WatchHandle) {
        let Some(path) = self.forget(handle) else {
            return;
        };

        // The kernel drops watches on deleted directories by itself, so a
        // failure here is expected after a delete.
        if let Err(e) = self.source.remove_watch(handle) {
            crate::debug_event!(
                "table",
                "remove_watch failed",
                "{handle} {}: {e}",
                path.display()
            );
        }
    }

    /// Drop the entry for `handle` without touching the kernel watch.
    ///
    /// Used when the kernel reports it has already removed the watch.
    pub fn forget(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.by_handle.remove(&handle)?;
        self.by_path.remove(&path);
        crate::debug_event!("table", "removed", "{handle} {}", path.display());
        Some(path)
    }

    /// Path watched under `handle`.
    pub fn resolve(&self, handle: WatchHandle) -> Result<&Path, WatchError> {
        self.by_handle
            .get(&handle)
            .map(PathBuf::as_path)
            .ok_or(WatchError::UnknownHandle { handle })
    }

    /// Handle watching exactly `path`, if any.
    pub fn handle_of(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Remove `path` and every watched directory below it.
    ///
    /// Returns the number of entries removed.
    pub fn remove_subtree(&mut self, path: &Path) -> usize {
        let doomed = self.subtree_handles(path);
        for handle in &doomed {
            self.remove(*handle);
        }
        doomed.len()
    }

    /// Re-key `from` and every entry below it under `to` after a rename.
    ///
    /// Handles are unchanged; the kernel keeps watching the moved inodes.
    /// Returns the number of entries rewritten.
    pub fn rename_subtree(&mut self, from: &Path, to: &Path) -> usize {
        let moved = self.subtree_handles(from);
        for handle in &moved {
            let Some(old) = self.by_handle.get(handle).cloned() else {
                continue;
            };
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };

            self.by_path.remove(&old);
            // A stale entry left at the destination would violate the
            // one-entry-per-path invariant.
            if let Some(stale) = self.by_path.insert(new.clone(), *handle) {
                if stale != *handle {
                    self.by_handle.remove(&stale);
                }
            }
            self.by_handle.insert(*handle, new);
        }
        moved.len()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Iterate over live entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (WatchHandle, &Path)> {
        self.by_handle.iter().map(|(h, p)| (*h, p.as_path()))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn subtree_handles(&self, root: &Path) -> Vec<WatchHandle> {
        self.by_path
            .iter()
            .filter(|(path, _)| path.starts_with(root))
            .map(|(_, handle)| *handle)
            .collect()
    }
}

fn describe_add_failure(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::StorageFull => {
            format!("{e} (watch limit reached, raise fs.inotify.max_user_watches)")
        }
        _ => e.to_string(),
    }
}

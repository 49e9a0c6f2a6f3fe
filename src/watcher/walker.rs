//! Recursive directory discovery that arms a watch on every directory.
//!
//! Traversal only descends through real directories: symlinks are never
//! followed, so cyclic links cannot make the walk (or the watch set) grow
//! without bound.

use std::path::Path;

use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use super::error::WatchError;
use super::source::NotificationSource;
use super::table::WatchTable;

/// Outcome of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Directories that now have a watch.
    pub watched: usize,
    /// Directories whose watch could not be created.
    pub skipped: usize,
}

impl WalkStats {
    fn merge(&mut self, other: WalkStats) {
        self.watched += other.watched;
        self.skipped += other.skipped;
    }
}

/// Walks a directory tree and registers watches through a [`WatchTable`].
#[derive(Debug, Clone, Default)]
pub struct TreeWalker {
    exclude: Vec<Pattern>,
}

impl TreeWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip directories whose file name matches any of `patterns`.
    ///
    /// Invalid patterns are logged and ignored.
    pub fn with_exclude<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match Pattern::new(pattern) {
                Ok(p) => self.exclude.push(p),
                Err(e) => crate::warn_event!("walker", "invalid exclude pattern", "'{pattern}': {e}"),
            }
        }
        self
    }

    /// Whether entries called `name` are excluded from watching.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(name))
    }

    /// Watch `root` and every directory below it.
    ///
    /// Only an unreadable root, or a failure to watch the root itself, is
    /// an error; failures further down are logged and counted as skipped.
    pub fn populate<S: NotificationSource>(
        &self,
        root: &Path,
        table: &mut WatchTable<S>,
    ) -> Result<WalkStats, WatchError> {
        let metadata = std::fs::metadata(root).map_err(|e| WatchError::RootUnreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(WatchError::RootUnreadable {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        std::fs::read_dir(root).map_err(|e| WatchError::RootUnreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        table.add(root)?;

        let mut stats = WalkStats {
            watched: 1,
            skipped: 0,
        };
        stats.merge(self.populate_below(root, table));

        crate::log_event!(
            "walker",
            "populated",
            "{} watched, {} skipped under {}",
            stats.watched,
            stats.skipped,
            root.display()
        );
        Ok(stats)
    }

    /// Watch every directory strictly below `dir`.
    ///
    /// Used when re-arming a freshly created directory; `dir` may already be
    /// gone by then, which simply yields empty stats.
    pub fn populate_below<S: NotificationSource>(
        &self,
        dir: &Path,
        table: &mut WatchTable<S>,
    ) -> WalkStats {
        let mut stats = WalkStats::default();

        let walk = WalkDir::new(dir)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| self.should_descend(entry));

        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Unreadable directories were already watched when they
                    // were yielded; only their contents are lost.
                    crate::debug_event!("walker", "read failed", "{e}");
                    continue;
                }
            };

            if table.contains_path(entry.path()) {
                continue;
            }

            match table.add(entry.path()) {
                Ok(_) => stats.watched += 1,
                Err(e) => {
                    crate::warn_event!("walker", "skipping directory", "{e}");
                    stats.skipped += 1;
                }
            }
        }

        stats
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        // walkdir applies the filter to the start directory too.
        if entry.depth() == 0 {
            return true;
        }
        if !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        !self.is_excluded(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::source::ScriptedSource;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_root_watches_only_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = WatchTable::new(ScriptedSource::new());

        let stats = TreeWalker::new()
            .populate(temp_dir.path(), &mut table)
            .unwrap();

        assert_eq!(stats, WalkStats { watched: 1, skipped: 0 });
        assert!(table.contains_path(temp_dir.path()));
    }

    #[test]
    fn test_nested_directories_are_watched() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("a/file.txt"), "x").unwrap();

        let mut table = WatchTable::new(ScriptedSource::new());
        let stats = TreeWalker::new().populate(root, &mut table).unwrap();

        assert_eq!(stats.watched, 5);
        assert_eq!(stats.skipped, 0);
        assert!(table.contains_path(&root.join("a/b/c")));
        assert!(!table.contains_path(&root.join("a/file.txt")));
    }

    #[test]
    fn test_failed_subdirectory_does_not_abort_walk() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("locked")).unwrap();
        fs::create_dir(root.join("open")).unwrap();

        let source = ScriptedSource::new().deny(root.join("locked"));
        let mut table = WatchTable::new(source);
        let stats = TreeWalker::new().populate(root, &mut table).unwrap();

        assert_eq!(stats, WalkStats { watched: 2, skipped: 1 });
        assert!(table.contains_path(&root.join("open")));
    }

    #[test]
    fn test_symlinked_directory_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root, root.join("real/loop")).unwrap();

        let mut table = WatchTable::new(ScriptedSource::new());
        let stats = TreeWalker::new().populate(root, &mut table).unwrap();

        assert_eq!(stats.watched, 2);
        assert!(!table.contains_path(&root.join("real/loop")));
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir(root.join("src")).unwrap();

        let mut table = WatchTable::new(ScriptedSource::new());
        let stats = TreeWalker::new()
            .with_exclude([".git"])
            .populate(root, &mut table)
            .unwrap();

        assert_eq!(stats.watched, 2);
        assert!(!table.contains_path(&root.join(".git/objects")));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = WatchTable::new(ScriptedSource::new());

        let err = TreeWalker::new()
            .populate(&temp_dir.path().join("nope"), &mut table)
            .unwrap_err();
        assert!(matches!(err, WatchError::RootUnreadable { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_file_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let mut table = WatchTable::new(ScriptedSource::new());
        let err = TreeWalker::new().populate(&file, &mut table).unwrap_err();
        assert!(matches!(err, WatchError::RootUnreadable { .. }));
    }

    #[test]
    fn test_populate_below_missing_dir_is_empty() {
        let mut table = WatchTable::new(ScriptedSource::new());
        let stats = TreeWalker::new().populate_below(Path::new("/definitely/not/here"), &mut table);
        assert_eq!(stats, WalkStats::default());
    }
}

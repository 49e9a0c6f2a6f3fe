//! In-memory notification source fed with prepared buffers.
//!
//! Behaves like the kernel where it matters to the watcher: handles are
//! allocated sequentially, registering the same path twice returns the same
//! handle, removing an unknown handle is an error, and `read_next` waits
//! until a buffer is pushed.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::NotificationSource;
use crate::watcher::mask::EventMask;
use crate::watcher::types::WatchHandle;

/// Scripted source for embedding the watcher without a kernel facility.
#[derive(Debug)]
pub struct ScriptedSource {
    next_handle: i32,
    watches: HashMap<WatchHandle, PathBuf>,
    denied: HashSet<PathBuf>,
    limit: Option<usize>,
    removed: Vec<WatchHandle>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            next_handle: 1,
            watches: HashMap::new(),
            denied: HashSet::new(),
            limit: None,
            removed: Vec::new(),
            tx,
            rx,
        }
    }

    /// Start allocating handles at `first`.
    pub fn with_first_handle(mut self, first: i32) -> Self {
        self.next_handle = first;
        self
    }

    /// Refuse to watch `path` with a permission error.
    pub fn deny(mut self, path: impl Into<PathBuf>) -> Self {
        self.denied.insert(path.into());
        self
    }

    /// Fail registrations once `limit` watches are live.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Queue a buffer to be returned by a later `read_next`.
    pub fn push(&self, buffer: Vec<u8>) {
        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.tx.send(buffer);
    }

    /// Handle that can queue buffers after the source has been moved away.
    pub fn feeder(&self) -> mpsc::UnboundedSender<Vec<u8>> {
        self.tx.clone()
    }

    /// Path registered under `handle`, as the source sees it.
    pub fn watched_path(&self, handle: WatchHandle) -> Option<&Path> {
        self.watches.get(&handle).map(PathBuf::as_path)
    }

    /// Number of live registrations.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Handles passed to `remove_watch` that were live at the time.
    pub fn removed(&self) -> &[WatchHandle] {
        &self.removed
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    fn add_watch(&mut self, path: &Path, _mask: EventMask) -> io::Result<WatchHandle> {
        if self.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            ));
        }

        if let Some((handle, _)) = self.watches.iter().find(|(_, p)| p.as_path() == path) {
            return Ok(*handle);
        }

        if self.limit.is_some_and(|limit| self.watches.len() >= limit) {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                "no space left on device",
            ));
        }

        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;
        self.watches.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        match self.watches.remove(&handle) {
            Some(_) => {
                self.removed.push(handle);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid argument",
            )),
        }
    }

    async fn read_next(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(next) = self.rx.recv().await else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source closed"));
        };

        if next.len() > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer of {} bytes too small for {}", buf.len(), next.len()),
            ));
        }

        buf[..next.len()].copy_from_slice(&next);
        Ok(next.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_same_handle() {
        let mut source = ScriptedSource::new();
        let mask = EventMask::directory_watch();
        let a = source.add_watch(Path::new("/w"), mask).unwrap();
        let b = source.add_watch(Path::new("/w"), mask).unwrap();
        assert_eq!(a, b);
        assert_eq!(source.watch_count(), 1);
    }

    #[test]
    fn test_remove_unknown_is_error() {
        let mut source = ScriptedSource::new();
        let err = source.remove_watch(WatchHandle(42)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_read_returns_pushed_buffer() {
        let mut source = ScriptedSource::new();
        source.push(vec![1, 2, 3]);

        let mut buf = [0u8; 8];
        let n = source.read_next(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }
}

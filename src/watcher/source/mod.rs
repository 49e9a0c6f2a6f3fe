//! Notification sources: the kernel facility the watcher is built on.
//!
//! The watcher only needs four things from a source: register a watch,
//! drop a watch, and block until the next buffer of frames is available.
//! Construction plays the role of `init` and `Drop` the role of `close`.

#[cfg(target_os = "linux")]
mod inotify;
mod scripted;

use std::io;
use std::path::Path;

use async_trait::async_trait;

use super::mask::EventMask;
use super::types::WatchHandle;

#[cfg(target_os = "linux")]
pub use inotify::InotifySource;
pub use scripted::ScriptedSource;

/// Kernel-level change notification facility.
#[async_trait]
pub trait NotificationSource: Send {
    /// Register interest in `path`, returning the handle events will carry.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle>;

    /// Drop a previously registered watch.
    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()>;

    /// Wait until at least one frame is available and copy frames into `buf`.
    ///
    /// Returns the number of bytes written. This is the only call in the
    /// watcher that suspends; it must be safe to drop mid-wait so that a
    /// cancelled dispatcher does not lose data.
    async fn read_next(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

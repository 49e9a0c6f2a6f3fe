//! Linux inotify backend.

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use async_trait::async_trait;
use inotify::{Inotify, WatchDescriptor, WatchMask};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::NotificationSource;
use crate::watcher::error::WatchError;
use crate::watcher::mask::EventMask;
use crate::watcher::types::WatchHandle;

/// An inotify instance driven by the tokio reactor.
///
/// Watches are managed through the `inotify` crate. Reads bypass its event
/// parser so the dispatcher decodes the kernel's frames itself. The
/// descriptor is closed when the source is dropped.
#[derive(Debug)]
pub struct InotifySource {
    inotify: AsyncFd<Inotify>,
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
}

impl InotifySource {
    /// Open a new inotify instance.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn init() -> Result<Self, WatchError> {
        // Opened non-blocking, so readiness can be raced against cancellation.
        let inotify = Inotify::init().map_err(|e| WatchError::SourceInit {
            reason: e.to_string(),
        })?;
        let raw = inotify.as_raw_fd();

        let inotify = AsyncFd::with_interest(inotify, Interest::READABLE).map_err(|e| {
            WatchError::SourceInit {
                reason: format!("cannot register inotify descriptor with the runtime: {e}"),
            }
        })?;

        crate::debug_event!("inotify", "initialized", "fd {raw}");
        Ok(Self {
            inotify,
            descriptors: HashMap::new(),
        })
    }
}

#[async_trait]
impl NotificationSource for InotifySource {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle> {
        let wd = self
            .inotify
            .get_mut()
            .watches()
            .add(path, WatchMask::from_bits_retain(mask.bits()))?;

        let handle = WatchHandle(wd.get_watch_descriptor_id());
        // The kernel may hand out an id again after dropping a watch itself.
        self.descriptors.insert(handle, wd);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        let wd = self.descriptors.remove(&handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no watch {handle}"))
        })?;
        self.inotify.get_mut().watches().remove(wd)
    }

    async fn read_next(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inotify.readable().await?;

            let result = guard.try_io(|inner| {
                // SAFETY: `buf` is valid for writes of `buf.len()` bytes and
                // the descriptor stays open for the lifetime of `inner`.
                let n = unsafe {
                    libc::read(
                        inner.get_ref().as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(read) => return read,
                // Spurious readiness; wait again.
                Err(_would_block) => continue,
            }
        }
    }
}

//! Event mask flags shared by the kernel interface and the decoder.
//!
//! Values follow the Linux inotify ABI (`<sys/inotify.h>`), so a mask read
//! out of a raw frame can be interpreted without going through libc.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in the `mask` field of a notification frame, and the
    /// interest mask passed when a watch is registered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// File was accessed.
        const ACCESS        = 0x0000_0001;
        /// File was modified.
        const MODIFY        = 0x0000_0002;
        /// Metadata changed.
        const ATTRIB        = 0x0000_0004;
        /// Writable file was closed.
        const CLOSE_WRITE   = 0x0000_0008;
        /// Unwritable file was closed.
        const CLOSE_NOWRITE = 0x0000_0010;
        /// File was opened.
        const OPEN          = 0x0000_0020;
        /// Entry moved out of the watched directory.
        const MOVED_FROM    = 0x0000_0040;
        /// Entry moved into the watched directory.
        const MOVED_TO      = 0x0000_0080;
        /// Entry created in the watched directory.
        const CREATE        = 0x0000_0100;
        /// Entry deleted from the watched directory.
        const DELETE        = 0x0000_0200;
        /// The watched directory itself was deleted.
        const DELETE_SELF   = 0x0000_0400;
        /// The watched directory itself was moved.
        const MOVE_SELF     = 0x0000_0800;
        /// Backing filesystem was unmounted.
        const UNMOUNT       = 0x0000_2000;
        /// Kernel event queue overflowed.
        const Q_OVERFLOW    = 0x0000_4000;
        /// Watch was removed, explicitly or by the kernel.
        const IGNORED       = 0x0000_8000;
        /// Only watch the path if it is a directory.
        const ONLYDIR       = 0x0100_0000;
        /// Do not dereference the path if it is a symlink.
        const DONT_FOLLOW   = 0x0200_0000;
        /// Stop reporting events for unlinked children.
        const EXCL_UNLINK   = 0x0400_0000;
        /// Subject of the event is a directory.
        const ISDIR         = 0x4000_0000;
    }
}

impl EventMask {
    /// Interest mask used for every directory watch.
    ///
    /// Covers the create/modify/delete trio plus the move pair used to keep
    /// the watch table consistent across renames.
    pub fn directory_watch() -> Self {
        Self::MODIFY
            | Self::CREATE
            | Self::DELETE
            | Self::MOVED_FROM
            | Self::MOVED_TO
            | Self::DELETE_SELF
            | Self::ONLYDIR
            | Self::DONT_FOLLOW
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::directory_watch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_watch_mask() {
        let mask = EventMask::directory_watch();
        assert!(mask.contains(EventMask::CREATE | EventMask::DELETE | EventMask::MODIFY));
        assert!(mask.contains(EventMask::ONLYDIR));
        assert!(!mask.contains(EventMask::ACCESS));
    }

    #[test]
    fn test_unknown_bits_are_kept() {
        let mask = EventMask::from_bits_retain(0x8000_0000 | 0x100);
        assert!(mask.contains(EventMask::CREATE));
        assert_eq!(mask.bits(), 0x8000_0100);
    }
}

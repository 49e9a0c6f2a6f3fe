//! The watch loop: read, decode, react, forward.
//!
//! The dispatcher is the only owner of the [`WatchTable`]. Every lookup,
//! registration and removal happens on the task running [`Dispatcher::run`],
//! so the table needs no locking.
//!
//! Re-arming a new directory happens before later records of the same
//! buffer are handled, but the kernel has no atomic create-and-watch: files
//! written into a directory before its watch is armed produce no events.
//! [`TreeWalker::populate_below`] picks up directories created in that
//! window; plain files created in it are missed.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::decoder::{self, Frame, MIN_BUFFER_LEN};
use super::error::WatchError;
use super::mask::EventMask;
use super::source::NotificationSource;
use super::table::WatchTable;
use super::types::{ChangeKind, WatchEvent};
use super::walker::TreeWalker;
use crate::sink::EventSink;

/// Default read buffer: room for a few hundred typical frames.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for the next buffer.
    Idle,
    /// Handling the records of one buffer.
    Draining,
    /// Installing watches for a new directory.
    ReArming,
    /// Cancelled; no further buffers will be read.
    ShuttingDown,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub buffers: usize,
    pub records: usize,
    pub forwarded: usize,
    /// Records for unknown handles or excluded names.
    pub dropped: usize,
    /// Watches added after startup.
    pub rearmed: usize,
    /// Watches removed after startup.
    pub removed: usize,
    pub corrupt_buffers: usize,
    pub overflows: usize,
}

/// Directory moved away, awaiting its `MovedTo`.
#[derive(Debug)]
struct PendingMove {
    cookie: u32,
    from: PathBuf,
}

impl PendingMove {
    fn completed_by(&self, frame: &Frame) -> bool {
        frame.mask.contains(EventMask::MOVED_TO) && frame.cookie == self.cookie
    }
}

/// Translates notification buffers into sink events and keeps the watch
/// table in step with the directory tree.
#[derive(Debug)]
pub struct Dispatcher<S, K> {
    table: WatchTable<S>,
    walker: TreeWalker,
    sink: K,
    state: DispatchState,
    stats: DispatchStats,
    buffer_size: usize,
}

impl<S: NotificationSource, K: EventSink> Dispatcher<S, K> {
    pub fn new(table: WatchTable<S>, walker: TreeWalker, sink: K) -> Self {
        Self {
            table,
            walker,
            sink,
            state: DispatchState::Idle,
            stats: DispatchStats::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Size of the read buffer; never smaller than one maximal frame.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(MIN_BUFFER_LEN);
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn table(&self) -> &WatchTable<S> {
        &self.table
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Take the dispatcher apart, releasing the table and sink.
    pub fn into_parts(self) -> (WatchTable<S>, K) {
        (self.table, self.sink)
    }

    /// Run until `cancel` fires or the source fails.
    ///
    /// Cancellation is only observed between buffers: a buffer that has been
    /// read is always processed completely.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<DispatchStats, WatchError> {
        crate::log_event!(
            "dispatcher",
            "started",
            "{} directories watched",
            self.table.len()
        );

        let result = self.drain_until_cancelled(&cancel).await;

        self.set_state(DispatchState::ShuttingDown);
        if let Err(e) = self.sink.flush() {
            crate::warn_event!("dispatcher", "failed to flush sink", "{e}");
        }

        let stats = self.stats;
        crate::log_event!(
            "dispatcher",
            "stopped",
            "{} buffers, {} forwarded, {} dropped, {} re-armed, {} removed",
            stats.buffers,
            stats.forwarded,
            stats.dropped,
            stats.rearmed,
            stats.removed
        );
        result.map(|()| stats)
    }

    async fn drain_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<(), WatchError> {
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            self.set_state(DispatchState::Idle);

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = self.table.source_mut().read_next(&mut buffer) => Some(read),
            };
            let Some(read) = read else {
                return Ok(());
            };

            let n = read.map_err(|e| WatchError::SourceRead {
                reason: e.to_string(),
            })?;
            self.process_buffer(&buffer[..n]);
        }
    }

    /// Handle every frame of one buffer, in order.
    ///
    /// Corruption discards the rest of the buffer; no other error escapes.
    pub fn process_buffer(&mut self, buffer: &[u8]) {
        self.set_state(DispatchState::Draining);
        self.stats.buffers += 1;

        let mut pending_move: Option<PendingMove> = None;
        for frame in decoder::frames(buffer) {
            match frame {
                Ok(frame) => {
                    // The kernel queues both halves of a rename back to back.
                    if let Some(moved) = pending_move.take_if(|m| !m.completed_by(&frame)) {
                        self.settle_move(moved);
                    }
                    self.handle_frame(frame, &mut pending_move);
                }
                Err(e) => {
                    crate::warn_event!("dispatcher", "discarding rest of buffer", "{e}");
                    self.stats.corrupt_buffers += 1;
                    break;
                }
            }
        }

        if let Some(moved) = pending_move {
            self.settle_move(moved);
        }
    }

    /// A directory moved away with no matching arrival left the tree.
    fn settle_move(&mut self, moved: PendingMove) {
        let removed = self.table.remove_subtree(&moved.from);
        self.stats.removed += removed;
        crate::debug_event!(
            "dispatcher",
            "moved out",
            "{} ({removed} watches dropped)",
            moved.from.display()
        );
    }

    fn handle_frame(&mut self, frame: Frame, pending_move: &mut Option<PendingMove>) {
        if frame.mask.contains(EventMask::Q_OVERFLOW) {
            crate::warn_event!("dispatcher", "kernel event queue overflowed, changes were lost");
            self.stats.overflows += 1;
            return;
        }
        if frame.mask.contains(EventMask::IGNORED) {
            // Kernel-side removal; the handle may be reused from now on.
            if self.table.forget(frame.handle).is_some() {
                self.stats.removed += 1;
            }
            return;
        }
        if frame.mask.contains(EventMask::UNMOUNT) {
            if let Ok(path) = self.table.resolve(frame.handle) {
                crate::log_event!("dispatcher", "unmounted", "{}", path.display());
            }
            return;
        }

        let Some(record) = frame.to_record() else {
            crate::debug_event!("dispatcher", "control frame", "{:?}", frame.mask);
            return;
        };
        self.stats.records += 1;

        let parent = match self.table.resolve(record.handle) {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                crate::debug_event!("dispatcher", "dropped", "{e}");
                self.stats.dropped += 1;
                return;
            }
        };

        if !record.is_self() && self.walker.is_excluded(&record.name.to_string_lossy()) {
            self.stats.dropped += 1;
            return;
        }

        let path = if record.is_self() {
            parent
        } else {
            parent.join(&record.name)
        };
        // Watches are directory-only, so a self event is about a directory.
        let is_dir = record.is_dir || record.is_self();

        if is_dir {
            match record.kind {
                ChangeKind::Created => self.rearm(&path),
                ChangeKind::Deleted => {
                    self.stats.removed += self.table.remove_subtree(&path);
                    // The watched parent reports the same removal by name.
                    if record.is_self()
                        && path.parent().is_some_and(|parent| self.table.contains_path(parent))
                    {
                        crate::debug_event!("dispatcher", "self delete", "{}", path.display());
                        return;
                    }
                }
                ChangeKind::MovedFrom => {
                    *pending_move = Some(PendingMove {
                        cookie: record.cookie,
                        from: path.clone(),
                    });
                }
                ChangeKind::MovedTo => {
                    match pending_move.take_if(|m| m.cookie == record.cookie) {
                        Some(moved) => {
                            self.table.rename_subtree(&moved.from, &path);
                        }
                        // Arrived from outside the watched tree.
                        None => self.rearm(&path),
                    }
                }
                ChangeKind::Modified => {}
            }
        }

        let mut event = WatchEvent::new(&record, path);
        event.is_dir = is_dir;
        self.forward(&event);
    }

    fn rearm(&mut self, path: &Path) {
        self.set_state(DispatchState::ReArming);

        // `populate_below` of an ancestor may have armed it already.
        if !self.table.contains_path(path) {
            match self.table.add(path) {
                Ok(handle) => {
                    self.stats.rearmed += 1;
                    crate::debug_event!("dispatcher", "re-armed", "{handle} {}", path.display());
                }
                Err(e) => crate::warn_event!("dispatcher", "cannot re-arm", "{e}"),
            }
        }

        let below = self.walker.populate_below(path, &mut self.table);
        self.stats.rearmed += below.watched;

        self.set_state(DispatchState::Draining);
    }

    fn forward(&mut self, event: &WatchEvent) {
        let line = event.describe();
        match self.sink.deliver(event, &line) {
            Ok(()) => self.stats.forwarded += 1,
            Err(e) => crate::warn_event!("dispatcher", "sink rejected event", "{e}"),
        }
    }

    fn set_state(&mut self, state: DispatchState) {
        if self.state != state {
            tracing::trace!("[dispatcher] {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::watcher::decoder::encode_frame;
    use crate::watcher::source::ScriptedSource;
    use crate::watcher::types::WatchHandle;

    fn dispatcher_at(root: &str) -> (Dispatcher<ScriptedSource, MemorySink>, WatchHandle) {
        let mut table = WatchTable::new(ScriptedSource::new());
        let handle = table.add(Path::new(root)).unwrap();
        (
            Dispatcher::new(table, TreeWalker::new(), MemorySink::new()),
            handle,
        )
    }

    #[test]
    fn test_unknown_handle_is_dropped() {
        let (mut dispatcher, _) = dispatcher_at("/tmp/w");
        let buffer = encode_frame(WatchHandle(99), EventMask::CREATE, 0, "x");

        dispatcher.process_buffer(&buffer);

        assert!(dispatcher.sink().events().is_empty());
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[test]
    fn test_ignored_frame_forgets_handle() {
        let (mut dispatcher, handle) = dispatcher_at("/tmp/w");
        let buffer = encode_frame(handle, EventMask::IGNORED, 0, "");

        dispatcher.process_buffer(&buffer);

        assert!(dispatcher.table().is_empty());
        assert!(dispatcher.table().source().removed().is_empty());
        assert!(dispatcher.sink().events().is_empty());
    }

    #[test]
    fn test_rename_within_tree_rekeys_subtree() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        let moved = dispatcher.table.add(Path::new("/tmp/w/old")).unwrap();
        dispatcher.table.add(Path::new("/tmp/w/old/inner")).unwrap();

        let mut buffer = encode_frame(root, EventMask::MOVED_FROM | EventMask::ISDIR, 7, "old");
        buffer.extend(encode_frame(root, EventMask::MOVED_TO | EventMask::ISDIR, 7, "new"));
        dispatcher.process_buffer(&buffer);

        let table = dispatcher.table();
        assert_eq!(table.resolve(moved).unwrap(), Path::new("/tmp/w/new"));
        assert!(table.contains_path(Path::new("/tmp/w/new/inner")));
        assert!(!table.contains_path(Path::new("/tmp/w/old")));
        assert_eq!(dispatcher.sink().events().len(), 2);
    }

    #[test]
    fn test_unpaired_move_out_drops_subtree() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        dispatcher.table.add(Path::new("/tmp/w/gone")).unwrap();

        let buffer = encode_frame(root, EventMask::MOVED_FROM | EventMask::ISDIR, 3, "gone");
        dispatcher.process_buffer(&buffer);

        assert!(!dispatcher.table().contains_path(Path::new("/tmp/w/gone")));
        assert_eq!(dispatcher.stats().removed, 1);
    }

    #[test]
    fn test_directory_recreated_after_move_out_is_watched() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        dispatcher.table.add(Path::new("/tmp/w/a")).unwrap();

        let mut buffer = encode_frame(root, EventMask::MOVED_FROM | EventMask::ISDIR, 9, "a");
        buffer.extend(encode_frame(root, EventMask::CREATE | EventMask::ISDIR, 0, "a"));
        dispatcher.process_buffer(&buffer);

        let table = dispatcher.table();
        assert!(table.contains_path(Path::new("/tmp/w/a")));
        assert_eq!(table.len(), 2);
        assert_eq!(dispatcher.stats().removed, 1);
        assert_eq!(dispatcher.stats().rearmed, 1);
    }

    #[test]
    fn test_created_directory_already_armed_is_not_added_twice() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        let existing = dispatcher.table.add(Path::new("/tmp/w/b")).unwrap();

        let buffer = encode_frame(root, EventMask::CREATE | EventMask::ISDIR, 0, "b");
        dispatcher.process_buffer(&buffer);

        assert_eq!(dispatcher.table().handle_of(Path::new("/tmp/w/b")), Some(existing));
        assert_eq!(dispatcher.stats().rearmed, 0);
        assert_eq!(dispatcher.sink().events().len(), 1);
    }

    #[test]
    fn test_self_delete_under_watched_parent_reported_once() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        let child = dispatcher.table.add(Path::new("/tmp/w/old")).unwrap();

        let mut buffer = encode_frame(child, EventMask::DELETE_SELF, 0, "");
        buffer.extend(encode_frame(child, EventMask::IGNORED, 0, ""));
        buffer.extend(encode_frame(root, EventMask::DELETE | EventMask::ISDIR, 0, "old"));
        dispatcher.process_buffer(&buffer);

        let events = dispatcher.sink().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, Path::new("/tmp/w/old"));
        assert_eq!(dispatcher.table().len(), 1);
    }

    #[test]
    fn test_root_self_delete_is_forwarded() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");

        dispatcher.process_buffer(&encode_frame(root, EventMask::DELETE_SELF, 0, ""));

        assert_eq!(dispatcher.sink().lines(), ["The directory /tmp/w was deleted."]);
        assert!(dispatcher.table().is_empty());
    }

    #[test]
    fn test_overflow_is_counted_not_forwarded() {
        let (mut dispatcher, _) = dispatcher_at("/tmp/w");
        let buffer = encode_frame(WatchHandle(-1), EventMask::Q_OVERFLOW, 0, "");

        dispatcher.process_buffer(&buffer);

        assert_eq!(dispatcher.stats().overflows, 1);
        assert!(dispatcher.sink().events().is_empty());
    }

    #[test]
    fn test_excluded_names_are_dropped() {
        let mut table = WatchTable::new(ScriptedSource::new());
        let root = table.add(Path::new("/tmp/w")).unwrap();
        let walker = TreeWalker::new().with_exclude(["*.swp"]);
        let mut dispatcher = Dispatcher::new(table, walker, MemorySink::new());

        let mut buffer = encode_frame(root, EventMask::MODIFY, 0, ".a.txt.swp");
        buffer.extend(encode_frame(root, EventMask::MODIFY, 0, "a.txt"));
        dispatcher.process_buffer(&buffer);

        let events = dispatcher.sink().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "a.txt");
    }

    #[test]
    fn test_state_returns_to_draining_after_rearm() {
        let (mut dispatcher, root) = dispatcher_at("/tmp/w");
        let buffer = encode_frame(root, EventMask::CREATE | EventMask::ISDIR, 0, "sub");

        dispatcher.process_buffer(&buffer);

        assert_eq!(dispatcher.state(), DispatchState::Draining);
        assert_eq!(dispatcher.stats().rearmed, 1);
    }
}

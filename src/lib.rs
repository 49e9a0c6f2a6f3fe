//! Recursive filesystem change watcher.
//!
//! Arms a kernel watch on every directory below a root, keeps the watch set
//! in step as directories come and go, and turns raw notification buffers
//! into structured create/modify/delete events for an [`EventSink`].

pub mod cli;
pub mod config;
pub mod logging;
pub mod sink;
pub mod watcher;

pub use config::Settings;
pub use sink::{EventSink, MemorySink, SinkFormat, WriterSink};
pub use watcher::{
    ChangeKind, ChangeRecord, DispatchStats, Dispatcher, TreeWalker, WalkStats, WatchError,
    WatchEvent, WatchHandle, WatchTable,
};

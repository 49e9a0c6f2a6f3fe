//! Recursive directory watching on top of a kernel notification source.
//!
//! # Architecture
//!
//! ```text
//!  TreeWalker ──populate──▶ WatchTable ◀──add/remove/resolve── Dispatcher
//!                              │                                  │   ▲
//!                     NotificationSource ──raw buffer──▶ decoder ─┘   │
//!                              ▲                                      │
//!                              └──────────── read_next ───────────────┘
//!                                                                     │
//!                                                               EventSink
//! ```
//!
//! The walker arms a watch on every directory at startup. From then on the
//! dispatcher owns the table: it reads buffers from the source, decodes
//! them into change records, re-arms new directories, drops entries for
//! removed ones and forwards one normalized event per record to the sink.

pub mod decoder;
mod dispatcher;
mod error;
mod mask;
pub mod source;
mod table;
mod types;
mod walker;

pub use decoder::{Frame, Frames};
pub use dispatcher::{DEFAULT_BUFFER_SIZE, DispatchState, DispatchStats, Dispatcher};
pub use error::WatchError;
pub use mask::EventMask;
pub use source::{NotificationSource, ScriptedSource};
#[cfg(target_os = "linux")]
pub use source::InotifySource;
pub use table::WatchTable;
pub use types::{ChangeKind, ChangeRecord, WatchEvent, WatchHandle};
pub use walker::{TreeWalker, WalkStats};

//! Core value types passed between the decoder, table and dispatcher.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Identifier the kernel hands back when a watch is registered.
///
/// Unique among live watches only; the kernel may reuse a value once the
/// watch it named has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WatchHandle(pub i32);

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to the entry a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    MovedFrom,
    MovedTo,
}

impl ChangeKind {
    /// Past-tense verb used in log lines.
    pub fn verb(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::MovedFrom => "moved away",
            ChangeKind::MovedTo => "moved in",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One decoded change, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub handle: WatchHandle,
    /// Name relative to the watched directory; empty for events about the
    /// watched directory itself.
    pub name: OsString,
    pub is_dir: bool,
    pub kind: ChangeKind,
    /// Pairs a `MovedFrom` with its `MovedTo`; zero otherwise.
    pub cookie: u32,
}

impl ChangeRecord {
    /// Whether the record concerns the watched directory rather than a child.
    pub fn is_self(&self) -> bool {
        self.name.is_empty()
    }
}

/// Normalized event handed to a sink.
#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    pub timestamp: DateTime<Local>,
    pub handle: WatchHandle,
    /// Serialized lossily; names are not guaranteed to be UTF-8.
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_dir: bool,
    pub name: String,
}

impl WatchEvent {
    /// Build an event for a resolved record, stamped with the current time.
    pub fn new(record: &ChangeRecord, path: PathBuf) -> Self {
        Self {
            timestamp: Local::now(),
            handle: record.handle,
            path,
            kind: record.kind,
            is_dir: record.is_dir,
            name: record.name.to_string_lossy().into_owned(),
        }
    }

    /// Human-readable line, e.g. `The directory /tmp/w/sub was created.`
    pub fn describe(&self) -> String {
        let subject = if self.is_dir { "directory" } else { "file" };
        format!(
            "The {subject} {} was {}.",
            self.path.display(),
            self.kind.verb()
        )
    }
}

fn serialize_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

//! Decoding of raw notification buffers.
//!
//! A buffer is a run of variable-length frames laid out like the kernel's
//! `struct inotify_event`:
//!
//! ```text
//! +--------+--------+--------+--------+------------------------+
//! | wd i32 |mask u32|cookie  | len u32| name[len], NUL padded  |
//! +--------+--------+--------+--------+------------------------+
//! ```
//!
//! The decoder walks the buffer with a cursor, checks every advance against
//! the bytes actually read, and reports overruns as
//! [`WatchError::EventCorruption`] instead of reading past the end.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use super::error::WatchError;
use super::mask::EventMask;
use super::types::{ChangeKind, ChangeRecord, WatchHandle};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Longest name the kernel can attach to a frame (NAME_MAX plus the NUL).
pub const MAX_NAME_LEN: usize = 256;

/// Smallest read buffer guaranteed to hold one complete frame.
pub const MIN_BUFFER_LEN: usize = HEADER_LEN + MAX_NAME_LEN;

/// Kind flags in legacy priority order: when several are set on one frame
/// only the first match is reported.
const KIND_PRIORITY: [(EventMask, ChangeKind); 5] = [
    (EventMask::CREATE, ChangeKind::Created),
    (
        EventMask::DELETE.union(EventMask::DELETE_SELF),
        ChangeKind::Deleted,
    ),
    (EventMask::MODIFY, ChangeKind::Modified),
    (EventMask::MOVED_FROM, ChangeKind::MovedFrom),
    (EventMask::MOVED_TO, ChangeKind::MovedTo),
];

/// One raw frame, including control frames that carry no change kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    /// Name with the NUL padding stripped; empty for self events.
    pub name: OsString,
    /// Bytes this frame occupied in the buffer, header included.
    pub len: usize,
}

impl Frame {
    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    /// The single change kind this frame reports, if any.
    pub fn kind(&self) -> Option<ChangeKind> {
        KIND_PRIORITY
            .iter()
            .find(|(flags, _)| self.mask.intersects(*flags))
            .map(|(_, kind)| *kind)
    }

    /// Convert to a change record; `None` for control frames.
    pub fn to_record(&self) -> Option<ChangeRecord> {
        let kind = self.kind()?;
        Some(ChangeRecord {
            handle: self.handle,
            name: self.name.clone(),
            is_dir: self.is_dir(),
            kind,
            cookie: self.cookie,
        })
    }
}

/// Lazy iterator over the frames of one buffer.
///
/// Stops after the first corruption error; the rest of the buffer is
/// discarded.
#[derive(Debug)]
pub struct Frames<'a> {
    buffer: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Frames<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            pos: 0,
            failed: false,
        }
    }

    /// Bytes accounted for by the frames yielded so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn corrupt(&mut self, details: String) -> Option<Result<Frame, WatchError>> {
        self.failed = true;
        Some(Err(WatchError::EventCorruption {
            offset: self.pos,
            details,
        }))
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, WatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buffer.len() {
            return None;
        }

        let remaining = &self.buffer[self.pos..];
        if remaining.len() < HEADER_LEN {
            return self.corrupt(format!(
                "truncated header: {} of {HEADER_LEN} bytes",
                remaining.len()
            ));
        }

        let handle = WatchHandle(read_word(remaining, 0) as i32);
        let mask = EventMask::from_bits_retain(read_word(remaining, 4));
        let cookie = read_word(remaining, 8);
        let name_len = read_word(remaining, 12) as usize;

        let available = remaining.len() - HEADER_LEN;
        if name_len > available {
            return self.corrupt(format!(
                "declared name length {name_len} exceeds {available} remaining bytes"
            ));
        }

        let raw_name = &remaining[HEADER_LEN..HEADER_LEN + name_len];
        let end = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_name.len());
        let name = OsStr::from_bytes(&raw_name[..end]).to_os_string();

        let len = HEADER_LEN + name_len;
        self.pos += len;

        Some(Ok(Frame {
            handle,
            mask,
            cookie,
            name,
            len,
        }))
    }
}

impl std::iter::FusedIterator for Frames<'_> {}

/// Iterate over every frame in `buffer`.
pub fn frames(buffer: &[u8]) -> Frames<'_> {
    Frames::new(buffer)
}

/// Decode `buffer` into change records, skipping control frames.
pub fn decode(buffer: &[u8]) -> impl Iterator<Item = Result<ChangeRecord, WatchError>> + '_ {
    frames(buffer).filter_map(|frame| match frame {
        Ok(frame) => frame.to_record().map(Ok),
        Err(e) => Some(Err(e)),
    })
}

/// Encode one frame the way the kernel lays it out, padding the name with
/// NULs to a 16-byte boundary.
pub fn encode_frame(
    handle: WatchHandle,
    mask: EventMask,
    cookie: u32,
    name: impl AsRef<OsStr>,
) -> Vec<u8> {
    let name = name.as_ref().as_bytes();
    let padded = if name.is_empty() {
        0
    } else {
        (name.len() + 1).next_multiple_of(HEADER_LEN)
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + padded);
    frame.extend_from_slice(&handle.0.to_ne_bytes());
    frame.extend_from_slice(&mask.bits().to_ne_bytes());
    frame.extend_from_slice(&cookie.to_ne_bytes());
    frame.extend_from_slice(&(padded as u32).to_ne_bytes());
    frame.extend_from_slice(name);
    frame.resize(HEADER_LEN + padded, 0);
    frame
}

// Callers check that `at + 4` is within the header.
fn read_word(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(handle: i32, mask: EventMask, name: &str) -> Vec<u8> {
        encode_frame(WatchHandle(handle), mask, 0, name)
    }

    #[test]
    fn test_single_file_creation() {
        let buffer = frame(3, EventMask::CREATE, "a.txt");
        let records: Vec<_> = decode(&buffer).collect::<Result<_, _>>().unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].handle, WatchHandle(3));
        assert_eq!(records[0].kind, ChangeKind::Created);
        assert!(!records[0].is_dir);
        assert_eq!(records[0].name, "a.txt");
    }

    #[test]
    fn test_frame_lengths_cover_buffer() {
        let mut buffer = frame(1, EventMask::CREATE | EventMask::ISDIR, "sub");
        buffer.extend(frame(1, EventMask::MODIFY, "a-much-longer-file-name.txt"));
        buffer.extend(frame(2, EventMask::DELETE_SELF, ""));
        buffer.extend(frame(2, EventMask::IGNORED, ""));

        let mut iter = frames(&buffer);
        let mut total = 0;
        let mut count = 0;
        for frame in iter.by_ref() {
            total += frame.unwrap().len;
            count += 1;
        }

        assert_eq!(count, 4);
        assert_eq!(total, buffer.len());
        assert_eq!(iter.consumed(), buffer.len());
    }

    #[test]
    fn test_self_event_has_empty_name() {
        let buffer = frame(5, EventMask::DELETE_SELF, "");
        let records: Vec<_> = decode(&buffer).collect::<Result<_, _>>().unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].is_self());
        assert_eq!(records[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_priority_create_over_delete_over_modify() {
        let buffer = frame(1, EventMask::CREATE | EventMask::MODIFY, "x");
        let record = decode(&buffer).next().unwrap().unwrap();
        assert_eq!(record.kind, ChangeKind::Created);

        let buffer = frame(1, EventMask::DELETE | EventMask::MODIFY, "x");
        let record = decode(&buffer).next().unwrap().unwrap();
        assert_eq!(record.kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_control_frames_are_not_records() {
        let mut buffer = frame(4, EventMask::IGNORED, "");
        buffer.extend(frame(4, EventMask::ATTRIB, "meta"));
        assert_eq!(decode(&buffer).count(), 0);
        assert_eq!(frames(&buffer).count(), 2);
    }

    #[test]
    fn test_name_length_overrun_stops_decoding() {
        let mut buffer = frame(3, EventMask::CREATE, "ok");
        let bad_offset = buffer.len();
        let mut bad = frame(3, EventMask::CREATE, "bad");
        bad[12..16].copy_from_slice(&4096u32.to_ne_bytes());
        buffer.extend(bad);
        buffer.extend(frame(3, EventMask::CREATE, "never"));

        let results: Vec<_> = decode(&buffer).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(WatchError::EventCorruption { offset, .. }) => assert_eq!(*offset, bad_offset),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_header() {
        let mut buffer = frame(3, EventMask::MODIFY, "a");
        buffer.extend_from_slice(&[0u8; 7]);

        let mut iter = frames(&buffer);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(WatchError::EventCorruption { .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(frames(&[]).count(), 0);
    }

    #[test]
    fn test_encode_pads_to_header_alignment() {
        let encoded = frame(1, EventMask::CREATE, "abc");
        assert_eq!(encoded.len(), HEADER_LEN * 2);

        let encoded = frame(1, EventMask::CREATE, "0123456789abcdef");
        assert_eq!(encoded.len(), HEADER_LEN * 3);
    }
}

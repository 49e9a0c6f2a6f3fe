//! Event sinks: where normalized watch events end up.
//!
//! A sink is handed to the dispatcher at construction and owned by it for
//! the rest of the run, so there is no process-wide logger state involved.
//! Every resolved change record produces exactly one `deliver` call, in the
//! order the kernel reported the changes.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::watcher::WatchEvent;

/// Output encoding for [`WriterSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// `<timestamp> <line>` per event.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Receiver of normalized events.
pub trait EventSink: Send {
    /// Record one event together with its human-readable line.
    fn deliver(&mut self, event: &WatchEvent, line: &str) -> io::Result<()>;

    /// Push buffered output to its destination.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn deliver(&mut self, event: &WatchEvent, line: &str) -> io::Result<()> {
        (**self).deliver(event, line)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Sink writing text or JSON lines to any writer.
pub struct WriterSink {
    out: Box<dyn Write + Send>,
    format: SinkFormat,
}

impl WriterSink {
    pub fn new(out: impl Write + Send + 'static, format: SinkFormat) -> Self {
        Self {
            out: Box::new(out),
            format,
        }
    }

    /// Sink writing to standard output.
    pub fn stdout(format: SinkFormat) -> Self {
        Self::new(io::stdout(), format)
    }

    /// Sink appending to `path`, creating it if needed.
    pub fn append_to(path: &Path, format: SinkFormat) -> io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl std::fmt::Debug for WriterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSink")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl EventSink for WriterSink {
    fn deliver(&mut self, event: &WatchEvent, line: &str) -> io::Result<()> {
        match self.format {
            SinkFormat::Text => writeln!(
                self.out,
                "{} {line}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f")
            ),
            SinkFormat::Json => {
                // Serialize fully before writing so a failure leaves no partial line.
                let mut encoded = serde_json::to_vec(event)?;
                encoded.push(b'\n');
                self.out.write_all(&encoded)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<WatchEvent>,
    lines: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[WatchEvent] {
        &self.events
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl EventSink for MemorySink {
    fn deliver(&mut self, event: &WatchEvent, line: &str) -> io::Result<()> {
        self.events.push(event.clone());
        self.lines.push(line.to_string());
        Ok(())
    }
}

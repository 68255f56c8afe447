//! Event log for staging and supervision activity
//!
//! Provides a trait-based sink that embedders can point at their preferred
//! destination. The host records lifecycle and security events (spawns,
//! exits, kills, blocked paths, skipped rules) independently of the tracing
//! output.

use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// An event worth keeping after the fact.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// ISO 8601 timestamp.
    pub timestamp: String,
    pub kind: EventKind,
    /// Process identity, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Human-readable specifics.
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            pid: None,
            detail: detail.into(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// Type of event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessSpawned,
    ProcessExited,
    ProcessErrored,
    ProcessKilled,
    UnsafePathBlocked,
    ZoneSkipped,
    RuleSkipped,
    SandboxCleared,
    SessionEnded,
}

/// Error type for sink operations.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to write event log: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for recorded events.
///
/// Implementations must tolerate concurrent `record` calls; the host shares
/// one sink across the staging engine and the supervisor.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: Event) -> Result<(), EventError>;

    /// Flush any buffered events.
    fn flush(&self) -> Result<(), EventError>;
}

// ============================================================================
// Default implementations
// ============================================================================

/// File-based sink, one JSON object per line.
pub struct FileEventSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileEventSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FileEventSink {
    fn record(&self, event: Event) -> Result<(), EventError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryEventSink {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn find_by_kind(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: Event) -> Result<(), EventError> {
        self.events.write().unwrap().push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventSink")
            .field("count", &self.count())
            .finish()
    }
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl NullEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for NullEventSink {
    fn record(&self, _event: Event) -> Result<(), EventError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemoryEventSink::new();
        sink.record(Event::new(EventKind::ProcessSpawned, "demo.js").with_pid(42))
            .unwrap();
        sink.record(Event::new(EventKind::UnsafePathBlocked, "../etc"))
            .unwrap();

        assert_eq!(sink.count(), 2);
        let spawned = sink.find_by_kind(EventKind::ProcessSpawned);
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].pid, Some(42));
    }

    #[test]
    fn test_null_sink() {
        let sink = NullEventSink::new();
        assert!(sink
            .record(Event::new(EventKind::SessionEnded, "bye"))
            .is_ok());
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(EventKind::RuleSkipped, "unsafe output path").with_pid(7);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("rule_skipped"));
        assert!(json.contains("unsafe output path"));
        assert!(json.contains("\"pid\":7"));
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");

        let sink = FileEventSink::new(&path).unwrap();
        sink.record(Event::new(EventKind::SandboxCleared, "all zones"))
            .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("sandbox_cleared"));
    }
}

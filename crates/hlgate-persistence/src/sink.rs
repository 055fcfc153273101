//! Audit sinks.
//!
//! The JSON Lines sink writes one event per line to
//! `{base_dir}/audit_{YYYY-MM-DD}.jsonl`, opened in append mode and
//! rotated when the event date changes. Every append is flushed before
//! returning so an acknowledged event survives a crash.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hlgate_core::AuditEvent;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Append-only destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Append one event. Must not return before the event is durable.
    fn append(&self, event: &AuditEvent) -> PersistenceResult<()>;
}

// ============================================================================
// JsonLinesAuditSink
// ============================================================================

/// Open file for the current day.
struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    events_written: usize,
}

/// Daily-rotated JSON Lines audit file.
pub struct JsonLinesAuditSink {
    base_dir: PathBuf,
    active: Mutex<Option<ActiveFile>>,
}

impl JsonLinesAuditSink {
    /// Create a sink rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            active: Mutex::new(None),
        })
    }

    /// Path of the file holding events for `date` (`YYYY-MM-DD`).
    #[must_use]
    pub fn file_for(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("audit_{date}.jsonl"))
    }

    /// Read every event from one audit file.
    pub fn read_file(path: impl AsRef<Path>) -> PersistenceResult<Vec<AuditEvent>> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    fn open(&self, date: &str) -> PersistenceResult<ActiveFile> {
        let path = self.file_for(date);
        info!(path = %path.display(), "Opening audit file (append mode)");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ActiveFile {
            writer: BufWriter::new(file),
            date: date.to_string(),
            events_written: 0,
        })
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&self, event: &AuditEvent) -> PersistenceResult<()> {
        let line = serde_json::to_string(event)?;
        let date = event_date(event.timestamp_ms);

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.date != date) {
            if let Some(mut old) = active.take() {
                old.writer.flush()?;
                info!(
                    date = %old.date,
                    events = old.events_written,
                    "Rotated audit file"
                );
            }
        }
        if active.is_none() {
            *active = Some(self.open(&date)?);
        }

        if let Some(file) = active.as_mut() {
            writeln!(file.writer, "{line}")?;
            file.writer.flush()?;
            file.events_written += 1;
        }

        debug!(kind = %event.kind, date = %date, "Audit event appended");
        Ok(())
    }
}

impl Drop for JsonLinesAuditSink {
    fn drop(&mut self) {
        if let Some(mut file) = self.active.lock().take() {
            if let Err(e) = file.writer.flush() {
                warn!(?e, "Failed to flush audit file on drop");
            }
        }
    }
}

fn event_date(timestamp_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64)
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}

// ============================================================================
// MemoryAuditSink
// ============================================================================

/// In-memory sink that keeps every event.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events appended so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> PersistenceResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlgate_core::{AuditEventKind, IntentId};
    use serde_json::json;
    use tempfile::TempDir;

    // 2024-01-01T00:00:00Z
    const DAY1_MS: u64 = 1_704_067_200_000;
    const DAY_MS: u64 = 86_400_000;

    fn event(kind: AuditEventKind, ts: u64, intent: &str) -> AuditEvent {
        AuditEvent::new(kind, json!({ "n": ts }), ts).with_intent(IntentId::from(intent))
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesAuditSink::new(dir.path()).unwrap();

        for i in 0..3 {
            sink.append(&event(AuditEventKind::OrderSubmitted, DAY1_MS + i, "a"))
                .unwrap();
        }

        let events = JsonLinesAuditSink::read_file(sink.file_for("2024-01-01")).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, AuditEventKind::OrderSubmitted);
        assert_eq!(events[2].timestamp_ms, DAY1_MS + 2);
    }

    #[test]
    fn test_append_mode_preserves_existing() {
        let dir = TempDir::new().unwrap();
        {
            let sink = JsonLinesAuditSink::new(dir.path()).unwrap();
            sink.append(&event(AuditEventKind::OrderRejected, DAY1_MS, "a"))
                .unwrap();
        }
        {
            let sink = JsonLinesAuditSink::new(dir.path()).unwrap();
            sink.append(&event(AuditEventKind::OrderError, DAY1_MS + 1, "b"))
                .unwrap();
        }

        let sink = JsonLinesAuditSink::new(dir.path()).unwrap();
        let events = JsonLinesAuditSink::read_file(sink.file_for("2024-01-01")).unwrap();
        assert_eq!(events.len(), 2, "second writer must append, not truncate");
        assert_eq!(events[1].intent_id, Some(IntentId::from("b")));
    }

    #[test]
    fn test_rotates_on_date_change() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesAuditSink::new(dir.path()).unwrap();
        sink.append(&event(AuditEventKind::OrderSubmitted, DAY1_MS, "a"))
            .unwrap();
        sink.append(&event(AuditEventKind::OrderSubmitted, DAY1_MS + DAY_MS, "b"))
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(sink.file_for("2024-01-02").exists());
    }

    #[test]
    fn test_no_file_without_events() {
        let dir = TempDir::new().unwrap();
        let _sink = JsonLinesAuditSink::new(dir.path()).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());
        sink.append(&event(AuditEventKind::OrderSubmitted, 1, "a"))
            .unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].intent_id, Some(IntentId::from("a")));
    }
}

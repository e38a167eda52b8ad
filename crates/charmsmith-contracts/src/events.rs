use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

pub type EventPayload = Map<String, Value>;

/// Gallery mutations recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryEvent {
    ReferenceAdded,
    ReferenceDeleted,
    AnalysisReplaced,
    EmbeddingUnavailable,
    EmbeddingsRegenerated,
}

impl GalleryEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            GalleryEvent::ReferenceAdded => "reference_added",
            GalleryEvent::ReferenceDeleted => "reference_deleted",
            GalleryEvent::AnalysisReplaced => "analysis_replaced",
            GalleryEvent::EmbeddingUnavailable => "embedding_unavailable",
            GalleryEvent::EmbeddingsRegenerated => "embeddings_regenerated",
        }
    }
}

/// Append-only journal at `<gallery>/events.jsonl`.
///
/// Each line is one compact JSON object with `type`, `gallery` and `ts`;
/// the caller payload is merged last and may override those keys.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    gallery: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, gallery: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                gallery: gallery.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn gallery(&self) -> &str {
        &self.inner.gallery
    }

    pub fn record(&self, event: GalleryEvent, payload: EventPayload) -> anyhow::Result<Value> {
        self.emit(event.as_str(), payload)
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "gallery".to_string(),
            Value::String(self.inner.gallery.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Journal writes never fail a mutation; problems are logged instead.
    pub fn record_quietly(&self, event: GalleryEvent, payload: EventPayload) {
        if let Err(err) = self.record(event, payload) {
            warn!(event = event.as_str(), error = %format!("{err:#}"), "failed to journal gallery event");
        }
    }
}

/// Reads the last `limit` journal entries, oldest first. Lines that are not
/// JSON objects are skipped.
pub fn read_events(path: &Path, limit: usize) -> anyhow::Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let mut events: Vec<Value> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .collect();
    if events.len() > limit {
        events.drain(..events.len() - limit);
    }
    Ok(events)
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    #[test]
    fn record_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "studio");

        let mut payload = EventPayload::new();
        payload.insert("id".to_string(), Value::String("ref-1".to_string()));
        let emitted = writer.record(GalleryEvent::ReferenceAdded, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("reference_added".to_string()));
        assert_eq!(parsed["gallery"], Value::String("studio".to_string()));
        assert_eq!(parsed["id"], Value::String("ref-1".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "studio");

        let mut payload = EventPayload::new();
        payload.insert("gallery".to_string(), Value::String("other".to_string()));
        let emitted = writer.emit("custom", payload)?;

        assert_eq!(emitted["type"], Value::String("custom".to_string()));
        assert_eq!(emitted["gallery"], Value::String("other".to_string()));
        Ok(())
    }

    #[test]
    fn read_events_keeps_tail_and_skips_garbage() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "studio");

        writer.record(GalleryEvent::ReferenceAdded, EventPayload::new())?;
        writer.record(GalleryEvent::EmbeddingUnavailable, EventPayload::new())?;
        writer.record(GalleryEvent::ReferenceDeleted, EventPayload::new())?;
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(b"not json\n[1,2]\n")?;

        let events = read_events(&path, 2)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], Value::String("embedding_unavailable".to_string()));
        assert_eq!(events[1]["type"], Value::String("reference_deleted".to_string()));

        assert!(read_events(&temp.path().join("missing.jsonl"), 10)?.is_empty());
        Ok(())
    }
}

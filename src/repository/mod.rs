//! Durable event repository
//!
//! Append-only JSONL log of normalized events. Every append is fsynced
//! before the caller's in-memory state is allowed to commit, so an
//! acknowledged event is always on disk. Retention is enforced by row
//! count and by absolute age through an atomic rewrite of the log.
//!
//! The log deliberately keeps superseded rows: per-partition history
//! lives here, while latest-write-wins deduplication is the event
//! store's concern.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::types::{EventKind, EventRecord};

/// One persisted row. The payload is stored in serialized string form;
/// readers decode it and fall back to the raw string on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: String,
    pub occurred_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl StoredRow {
    fn from_record(record: &EventRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            payload: record.payload.to_string(),
            occurred_at: record.occurred_at,
            partition_key: record.partition_key.clone(),
        }
    }

    /// Rebuild the in-memory record; a payload that no longer parses is
    /// carried as a raw string rather than dropped.
    pub fn into_record(self) -> EventRecord {
        let payload = serde_json::from_str(&self.payload)
            .unwrap_or_else(|_| Value::String(self.payload.clone()));
        EventRecord {
            id: self.id,
            kind: self.kind,
            payload,
            occurred_at: self.occurred_at,
            partition_key: self.partition_key,
        }
    }
}

/// Append-only persisted log with count and age retention
pub struct EventRepository {
    events_path: PathBuf,
    retention: RetentionPolicy,
    /// Serializes writers; readers go straight to the file
    write_lock: Mutex<()>,
    row_count: AtomicUsize,
}

impl EventRepository {
    /// Open (or create) the log under `data_dir` and count existing rows.
    pub fn open(data_dir: impl Into<PathBuf>, retention: RetentionPolicy) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let events_path = data_dir.join("events.jsonl");

        let repo = Self {
            events_path,
            retention,
            write_lock: Mutex::new(()),
            row_count: AtomicUsize::new(0),
        };
        let existing = repo.read_rows()?.len();
        repo.row_count.store(existing, Ordering::SeqCst);
        debug!(rows = existing, path = %repo.events_path.display(), "repository opened");
        Ok(repo)
    }

    /// Current number of persisted rows
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::SeqCst)
    }

    /// Append one event, fsynced. Triggers retention when the log has
    /// outgrown its row bound.
    pub fn append(&self, record: &EventRecord) -> Result<()> {
        let row = StoredRow::from_record(record);
        let line = serde_json::to_string(&row)?;

        {
            let _guard = self.write_lock.lock();
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.events_path)?;
            writeln!(file, "{}", line)?;
            file.sync_all()?;
        }

        let count = self.row_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.retention.max_rows {
            self.enforce_retention()?;
        }
        Ok(())
    }

    /// Most recent rows of one kind, newest-first
    pub fn load_recent(&self, kind: EventKind, limit: usize) -> Result<Vec<EventRecord>> {
        let mut rows: Vec<EventRecord> = self
            .read_rows()?
            .into_iter()
            .filter(|row| row.kind == kind)
            .map(StoredRow::into_record)
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Persisted single-update rows for one partition, newest-first.
    /// Superseded updates are retained here even though the live view
    /// only keeps the latest.
    pub fn history(&self, partition_key: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let mut rows: Vec<EventRecord> = self
            .read_rows()?
            .into_iter()
            .filter(|row| {
                row.kind == EventKind::Single && row.partition_key.as_deref() == Some(partition_key)
            })
            .map(StoredRow::into_record)
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Drop rows older than the retention window and keep at most
    /// `max_rows` of the newest remainder, rewriting the log atomically.
    pub fn enforce_retention(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        let cutoff = Utc::now() - self.retention.max_age;
        let mut rows = self.read_rows()?;
        let before = rows.len();
        rows.retain(|row| row.occurred_at >= cutoff);
        // Oldest dropped first when over the row bound
        rows.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        if rows.len() > self.retention.max_rows {
            let excess = rows.len() - self.retention.max_rows;
            rows.drain(..excess);
        }

        if rows.len() == before {
            return Ok(());
        }

        let temp_path = self.events_path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            for row in &rows {
                writeln!(file, "{}", serde_json::to_string(row)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.events_path)?;

        debug!(kept = rows.len(), dropped = before - rows.len(), "log compacted");
        self.row_count.store(rows.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Read every parseable row; malformed lines are skipped one by one
    /// so a single corrupt row never discards the rest of the log.
    fn read_rows(&self) -> Result<Vec<StoredRow>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRow>(&line) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(line = line_num + 1, %err, "skipping malformed row");
                }
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_repo(retention: RetentionPolicy) -> (EventRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = EventRepository::open(temp_dir.path(), retention).unwrap();
        (repo, temp_dir)
    }

    fn single(channel: &str, state: &str, occurred_at: chrono::DateTime<Utc>) -> EventRecord {
        EventRecord::single(json!({"channelId": channel, "state": state}), occurred_at)
    }

    #[test]
    fn test_append_and_history_order() {
        let (repo, _dir) = test_repo(RetentionPolicy::default());
        let t0 = Utc::now() - Duration::seconds(10);
        let t1 = Utc::now();

        repo.append(&single("chan-1", "open", t0)).unwrap();
        repo.append(&single("chan-1", "closed", t1)).unwrap();
        repo.append(&single("chan-2", "open", t1)).unwrap();

        let history = repo.history("chan-1", 200).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload["state"], "closed");
        assert_eq!(history[1].payload["state"], "open");
    }

    #[test]
    fn test_load_recent_filters_by_kind() {
        let (repo, _dir) = test_repo(RetentionPolicy::default());
        repo.append(&single("chan-1", "open", Utc::now())).unwrap();
        repo.append(&EventRecord::aggregate(json!([{"asset": "usdc"}]), Utc::now()))
            .unwrap();

        let singles = repo.load_recent(EventKind::Single, 10).unwrap();
        let aggregates = repo.load_recent(EventKind::Aggregate, 10).unwrap();
        assert_eq!(singles.len(), 1);
        assert_eq!(aggregates.len(), 1);
    }

    #[test]
    fn test_row_count_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let repo =
                EventRepository::open(temp_dir.path(), RetentionPolicy::default()).unwrap();
            repo.append(&single("chan-1", "open", Utc::now())).unwrap();
            repo.append(&single("chan-2", "open", Utc::now())).unwrap();
        }
        let repo = EventRepository::open(temp_dir.path(), RetentionPolicy::default()).unwrap();
        assert_eq!(repo.row_count(), 2);
    }

    #[test]
    fn test_retention_by_count_drops_oldest() {
        let retention = RetentionPolicy {
            max_rows: 3,
            ..Default::default()
        };
        let (repo, _dir) = test_repo(retention);
        let base = Utc::now() - Duration::seconds(100);
        for i in 0..5 {
            repo.append(&single(
                &format!("chan-{}", i),
                "open",
                base + Duration::seconds(i),
            ))
            .unwrap();
        }

        assert!(repo.row_count() <= 3);
        let recent = repo.load_recent(EventKind::Single, 10).unwrap();
        assert!(recent.iter().all(|r| r.partition_key.as_deref() != Some("chan-0")));
    }

    #[test]
    fn test_retention_by_age() {
        let retention = RetentionPolicy {
            max_age: chrono::Duration::hours(1),
            ..Default::default()
        };
        let (repo, _dir) = test_repo(retention);
        repo.append(&single("stale", "open", Utc::now() - Duration::hours(2)))
            .unwrap();
        repo.append(&single("fresh", "open", Utc::now())).unwrap();
        repo.enforce_retention().unwrap();

        let recent = repo.load_recent(EventKind::Single, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].partition_key.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let (repo, dir) = test_repo(RetentionPolicy::default());
        repo.append(&single("chan-1", "open", Utc::now())).unwrap();

        let path = dir.path().join("events.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json at all").unwrap();

        let repo = EventRepository::open(dir.path(), RetentionPolicy::default()).unwrap();
        assert_eq!(repo.row_count(), 1);
        assert_eq!(repo.load_recent(EventKind::Single, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_unparseable_payload_falls_back_to_raw_string() {
        let row = StoredRow {
            id: "chan-1".to_string(),
            kind: EventKind::Single,
            payload: "not-json".to_string(),
            occurred_at: Utc::now(),
            partition_key: Some("chan-1".to_string()),
        };
        let record = row.into_record();
        assert_eq!(record.payload, Value::String("not-json".to_string()));
    }
}

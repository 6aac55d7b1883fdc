//! Append-only history log keyed for chronological iteration.
//!
//! Keys are `<020-zero-padded-nanosecond-timestamp>-<msg-id>`. The
//! fixed-width prefix makes sled's lexicographic key order equal to
//! chronological order, so the newest records come back by iterating
//! the tree in reverse without loading the whole set.

use meshchat_proto::Record;
use meshchat_types::{MeshError, Result};
use std::path::Path;

const HISTORY_TREE: &str = "messages";

/// Persists chat history so peers can reload recent conversations on
/// restart.
pub struct HistoryStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl HistoryStore {
    /// Opens (or creates) the history database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StorageError`]; callers degrade to
    /// in-memory history instead of failing startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(MeshError::storage)?;
        let tree = db.open_tree(HISTORY_TREE).map_err(MeshError::storage)?;
        Ok(Self { db, tree })
    }

    /// Appends one record under its time-ordered key.
    pub fn append(&self, record: &Record) -> Result<()> {
        let nanos = record.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let key = history_key(nanos, &record.msg_id);
        let value = serde_json::to_vec(record).map_err(MeshError::storage)?;
        self.tree.insert(key, value).map_err(MeshError::storage)?;
        Ok(())
    }

    /// Returns up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(limit);
        for item in self.tree.iter().rev().take(limit) {
            let (_, value) = item.map_err(MeshError::storage)?;
            match serde_json::from_slice::<Record>(&value) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping undecodable history entry"),
            }
        }
        Ok(out)
    }

    /// Flushes and releases the handle. Idempotent.
    pub fn close(&self) {
        if let Err(e) = self.db.flush() {
            tracing::warn!(error = %e, "history flush failed on close");
        }
    }
}

fn history_key(nanos: i64, msg_id: &str) -> Vec<u8> {
    format!("{nanos:020}-{msg_id}").into_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn record(id: &str, ts: DateTime<Utc>) -> Record {
        Record {
            msg_id: id.into(),
            kind: "chat".into(),
            from: "alice".into(),
            origin: "127.0.0.1:9001".into(),
            content: format!("message {id}"),
            timestamp: ts,
            ..Record::default()
        }
    }

    #[test]
    fn recent_returns_newest_first_by_time_not_id() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::open(dir.path().join("history.db"))?;

        // IDs chosen so lexicographic ID order disagrees with time
        // order: "z" is oldest, "m" is newest.
        let base = Utc::now();
        store.append(&record("z", base))?;
        store.append(&record("a", base + Duration::nanoseconds(1)))?;
        store.append(&record("m", base + Duration::nanoseconds(2)))?;

        let recent = store.recent(2)?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].msg_id, "m");
        assert_eq!(recent[1].msg_id, "a");
        Ok(())
    }

    #[test]
    fn append_is_idempotent_per_key() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::open(dir.path().join("history.db"))?;

        let rec = record("dup", Utc::now());
        store.append(&rec)?;
        store.append(&rec)?;
        assert_eq!(store.recent(10)?.len(), 1);
        Ok(())
    }

    #[test]
    fn zero_limit_returns_nothing() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::open(dir.path().join("history.db"))?;
        store.append(&record("x", Utc::now()))?;
        assert!(store.recent(0)?.is_empty());
        Ok(())
    }

    #[test]
    fn history_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        {
            let store = HistoryStore::open(&path)?;
            store.append(&record("persisted", Utc::now()))?;
            store.close();
        }
        let store = HistoryStore::open(&path)?;
        let recent = store.recent(5)?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].msg_id, "persisted");
        Ok(())
    }

    #[test]
    fn key_prefix_is_fixed_width() {
        let key = history_key(42, "ab");
        assert!(key.starts_with(b"00000000000000000042-ab"));
        let later = history_key(1_700_000_000_000_000_000, "ab");
        assert!(key < later);
    }
}

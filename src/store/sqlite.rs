//! SQLite implementation of the durable [`RecordStore`].
//!
//! Entries, dashboards, and the change feed live in one database. Every
//! record write appends its change-feed row inside the same transaction, so
//! feed consumers never observe a record without its event (or vice versa).

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, TroveError};
use crate::store::{ChangeEvent, ChangeRecord, ChangeType, RecordStore};
use crate::types::{Dashboard, Entry};

const SCHEMA_SQL: &str = r#"
-- Captured knowledge, keyed by (owner, id). Immutable after insert except
-- for last_accessed bookkeeping.
CREATE TABLE IF NOT EXISTS entries (
    id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_original INTEGER NOT NULL,
    source_url TEXT,
    source_title TEXT,
    source_author TEXT,
    media_type TEXT NOT NULL CHECK(media_type IN ('text','audio','image')),
    tags TEXT NOT NULL DEFAULT '[]',
    last_accessed TEXT,
    skip_backup INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (owner_id, id)
);

CREATE INDEX IF NOT EXISTS idx_entries_domain ON entries(owner_id, domain);
CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(owner_id, created_at);

-- Keyed-singleton dashboards, one row per (owner, domain).
CREATE TABLE IF NOT EXISTS dashboards (
    owner_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (owner_id, domain)
);

-- Ordered change feed consumed by the backup propagator.
CREATE TABLE IF NOT EXISTS change_feed (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    change_type TEXT NOT NULL CHECK(change_type IN ('insert','modify')),
    record TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Initialize all record-store tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the record database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TroveError::StorageWrite(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            TroveError::StorageWrite(format!("failed to open database at {}: {e}", path.display()))
        })?;

        // WAL for concurrent readers alongside the single writer
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        init_schema(&conn).map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        tracing::info!(path = %path.display(), "record store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory record store (tests and ephemeral runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;
        init_schema(&conn).map_err(|e| TroveError::StorageWrite(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TroveError::StorageRead("record store lock poisoned".into()))
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let media_type: String = row.get(10)?;
    let tags_json: String = row.get(11)?;
    Ok(Entry {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        domain: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        is_original: row.get::<_, i64>(6)? != 0,
        source_url: row.get(7)?,
        source_title: row.get(8)?,
        source_author: row.get(9)?,
        media_type: media_type.parse().unwrap_or(crate::types::MediaType::Text),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        last_accessed: row.get(12)?,
        skip_backup: row.get::<_, i64>(13)? != 0,
    })
}

const ENTRY_COLUMNS: &str = "id, owner_id, domain, content, created_at, updated_at, \
     is_original, source_url, source_title, source_author, media_type, tags, \
     last_accessed, skip_backup";

fn append_change(
    tx: &rusqlite::Transaction<'_>,
    change: ChangeType,
    record: &ChangeRecord,
) -> Result<()> {
    let payload = serde_json::to_string(record)
        .map_err(|e| TroveError::StorageWrite(format!("failed to serialize change: {e}")))?;
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO change_feed (change_type, record, created_at) VALUES (?1, ?2, ?3)",
        params![change.as_str(), payload, now],
    )
    .map_err(|e| TroveError::StorageWrite(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put_entry(&self, entry: &Entry) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        let existed: bool = tx
            .query_row(
                "SELECT 1 FROM entries WHERE owner_id = ?1 AND id = ?2",
                params![entry.owner_id, entry.id],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?
            .unwrap_or(false);

        let tags_json = serde_json::to_string(&entry.tags)
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO entries \
             (id, owner_id, domain, content, created_at, updated_at, is_original, \
              source_url, source_title, source_author, media_type, tags, \
              last_accessed, skip_backup) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                entry.id,
                entry.owner_id,
                entry.domain,
                entry.content,
                entry.created_at,
                entry.updated_at,
                entry.is_original as i64,
                entry.source_url,
                entry.source_title,
                entry.source_author,
                entry.media_type.as_str(),
                tags_json,
                entry.last_accessed,
                entry.skip_backup as i64,
            ],
        )
        .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        let change = if existed {
            ChangeType::Modify
        } else {
            ChangeType::Insert
        };
        append_change(&tx, change, &ChangeRecord::Entry(entry.clone()))?;

        tx.commit()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        tracing::debug!(id = %entry.id, domain = %entry.domain, "entry persisted");
        Ok(())
    }

    async fn get_entry(&self, owner_id: &str, id: &str) -> Result<Option<Entry>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE owner_id = ?1 AND id = ?2"),
            params![owner_id, id],
            row_to_entry,
        )
        .optional()
        .map_err(|e| TroveError::StorageRead(e.to_string()))
    }

    async fn entries_by_ids(&self, owner_id: &str, ids: &[String]) -> Result<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;

        // Parameterized IN clause: ?2..?n+1 are ids, ?1 is the owner
        let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE owner_id = ?1 AND id IN ({})",
            placeholders.join(", ")
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TroveError::StorageRead(e.to_string()))?;

        let mut sql_params: Vec<&dyn rusqlite::types::ToSql> = vec![&owner_id];
        for id in ids {
            sql_params.push(id);
        }

        let rows = stmt
            .query_map(sql_params.as_slice(), row_to_entry)
            .map_err(|e| TroveError::StorageRead(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TroveError::StorageRead(e.to_string()))?;

        Ok(rows)
    }

    async fn touch_last_accessed(&self, owner_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut stmt = conn
            .prepare("UPDATE entries SET last_accessed = ?1 WHERE owner_id = ?2 AND id = ?3")
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;
        for id in ids {
            stmt.execute(params![now, owner_id, id])
                .map_err(|e| TroveError::StorageWrite(e.to_string()))?;
        }
        Ok(())
    }

    async fn put_dashboard(&self, dashboard: &Dashboard) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        let existed: bool = tx
            .query_row(
                "SELECT 1 FROM dashboards WHERE owner_id = ?1 AND domain = ?2",
                params![dashboard.owner_id, dashboard.domain],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?
            .unwrap_or(false);

        tx.execute(
            "INSERT OR REPLACE INTO dashboards (owner_id, domain, content, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dashboard.owner_id,
                dashboard.domain,
                dashboard.content,
                dashboard.created_at,
                dashboard.updated_at,
            ],
        )
        .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        let change = if existed {
            ChangeType::Modify
        } else {
            ChangeType::Insert
        };
        append_change(&tx, change, &ChangeRecord::Dashboard(dashboard.clone()))?;

        tx.commit()
            .map_err(|e| TroveError::StorageWrite(e.to_string()))?;

        tracing::debug!(domain = %dashboard.domain, "dashboard persisted");
        Ok(())
    }

    async fn get_dashboard(&self, owner_id: &str, domain: &str) -> Result<Option<Dashboard>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT owner_id, domain, content, created_at, updated_at \
             FROM dashboards WHERE owner_id = ?1 AND domain = ?2",
            params![owner_id, domain],
            |row| {
                Ok(Dashboard {
                    owner_id: row.get(0)?,
                    domain: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| TroveError::StorageRead(e.to_string()))
    }

    async fn changes_since(&self, after_seq: i64, limit: usize) -> Result<Vec<ChangeEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT seq, change_type, record FROM change_feed \
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .map_err(|e| TroveError::StorageRead(e.to_string()))?;

        let rows = stmt
            .query_map(params![after_seq, limit as i64], |row| {
                let seq: i64 = row.get(0)?;
                let change_type: String = row.get(1)?;
                let record_json: String = row.get(2)?;
                Ok((seq, change_type, record_json))
            })
            .map_err(|e| TroveError::StorageRead(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TroveError::StorageRead(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for (seq, change_type, record_json) in rows {
            let change: ChangeType = change_type
                .parse()
                .map_err(|e: String| TroveError::StorageRead(e))?;
            let record: ChangeRecord = serde_json::from_str(&record_json)
                .map_err(|e| TroveError::StorageRead(format!("corrupt change record: {e}")))?;
            events.push(ChangeEvent { seq, change, record });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, Intent, MediaType};

    fn test_entry(owner: &str, domain: &str, content: &str) -> Entry {
        let verdict = Classification {
            intent: Intent::Save,
            content: content.to_string(),
            is_original: true,
            source_url: None,
            source_title: None,
            source_author: None,
            media_type: MediaType::Text,
            tags: vec!["test".into()],
        };
        Entry::from_classification(owner, domain, content.to_string(), &verdict)
    }

    #[tokio::test]
    async fn entry_round_trip() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let entry = test_entry("casey", "life_log", "Walked to the lighthouse");
        store.put_entry(&entry).await.unwrap();

        let fetched = store.get_entry("casey", &entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "Walked to the lighthouse");
        assert_eq!(fetched.domain, "life_log");
        assert_eq!(fetched.tags, vec!["test".to_string()]);
        assert!(fetched.is_original);
    }

    #[tokio::test]
    async fn entries_are_owner_scoped() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let entry = test_entry("casey", "life_log", "private note");
        store.put_entry(&entry).await.unwrap();

        assert!(store
            .get_entry("someone_else", &entry.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn batch_hydration_skips_missing_ids() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let a = test_entry("casey", "dreams", "flying over water");
        let b = test_entry("casey", "dreams", "lost in a library");
        store.put_entry(&a).await.unwrap();
        store.put_entry(&b).await.unwrap();

        let fetched = store
            .entries_by_ids(
                "casey",
                &[a.id.clone(), "nope".to_string(), b.id.clone()],
            )
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn touch_updates_last_accessed_without_feed_event() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let entry = test_entry("casey", "ideas", "a garden of forking paths");
        store.put_entry(&entry).await.unwrap();

        store
            .touch_last_accessed("casey", &[entry.id.clone()])
            .await
            .unwrap();

        let fetched = store.get_entry("casey", &entry.id).await.unwrap().unwrap();
        assert!(fetched.last_accessed.is_some());

        // Only the original insert is on the feed
        let events = store.changes_since(0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, ChangeType::Insert);
    }

    #[tokio::test]
    async fn dashboard_upsert_emits_insert_then_modify() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let mut dash = Dashboard::seeded("casey", "life_log", "# Life Log\n");
        store.put_dashboard(&dash).await.unwrap();

        dash.content = "# Life Log\n\nrewritten".into();
        dash.updated_at = chrono::Utc::now().to_rfc3339();
        store.put_dashboard(&dash).await.unwrap();

        let events = store.changes_since(0, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].change, ChangeType::Insert);
        assert_eq!(events[1].change, ChangeType::Modify);
        match &events[1].record {
            ChangeRecord::Dashboard(d) => assert!(d.content.contains("rewritten")),
            other => panic!("expected dashboard record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn change_feed_is_ordered_and_cursored() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .put_entry(&test_entry("casey", "life_log", &format!("note {i}")))
                .await
                .unwrap();
        }

        let first = store.changes_since(0, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        let cursor = first.last().unwrap().seq;

        let rest = store.changes_since(cursor, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest[0].seq > cursor);
    }
}

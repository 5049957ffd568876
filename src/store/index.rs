//! sqlite-vec implementation of the [`VectorIndex`].
//!
//! One vec0 virtual table holds the vectors; a sidecar metadata table carries
//! namespace, owner, domain, timestamp, and denormalized content. KNN runs
//! globally and is post-filtered by namespace and owner, the same
//! fetch-then-filter pattern the rest of the pipeline uses.

use rusqlite::{params, Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Mutex, Once};

use async_trait::async_trait;

use crate::error::{Result, TroveError};
use crate::oracle::EMBEDDING_DIM;
use crate::store::{embedding_to_bytes, l2_to_cosine, IndexFilter, VectorHit, VectorIndex, VectorMeta};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

const META_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS vector_meta (
    key TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    created_at TEXT NOT NULL,
    content TEXT
);

CREATE INDEX IF NOT EXISTS idx_vector_meta_ns ON vector_meta(namespace, owner_id);
CREATE INDEX IF NOT EXISTS idx_vector_meta_created ON vector_meta(namespace, owner_id, created_at);
"#;

/// vec0 virtual table DDL (sqlite-vec syntax, created separately).
fn vec_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vectors USING vec0(\n\
         key TEXT PRIMARY KEY,\n\
         embedding FLOAT[{EMBEDDING_DIM}]\n\
         );"
    )
}

/// Initialize the index schema. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(META_SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql())
}

pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TroveError::IndexWrite(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        load_sqlite_vec();
        let conn = Connection::open(path).map_err(|e| {
            TroveError::IndexWrite(format!("failed to open index at {}: {e}", path.display()))
        })?;
        init_schema(&conn).map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        tracing::info!(path = %path.display(), "vector index initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        load_sqlite_vec();
        let conn =
            Connection::open_in_memory().map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        init_schema(&conn).map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TroveError::IndexQuery("vector index lock poisoned".into()))
    }
}

/// Composite key scoping a vector to its namespace.
fn vec_key(namespace: &str, id: &str) -> String {
    format!("{namespace}/{id}")
}

fn row_to_hit(row: &rusqlite::Row<'_>, score: f64) -> rusqlite::Result<VectorHit> {
    Ok(VectorHit {
        id: row.get(0)?,
        score,
        namespace: row.get(1)?,
        meta: VectorMeta {
            owner_id: row.get(2)?,
            domain: row.get(3)?,
            created_at: row.get(4)?,
            content: row.get(5)?,
        },
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        vector: &[f32],
        meta: &VectorMeta,
    ) -> Result<()> {
        if vector.len() != EMBEDDING_DIM {
            return Err(TroveError::IndexWrite(format!(
                "vector has {} dimensions, expected {EMBEDDING_DIM}",
                vector.len()
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        let key = vec_key(namespace, id);
        // vec0 has no ON CONFLICT; delete-then-insert for idempotent upsert
        tx.execute("DELETE FROM vectors WHERE key = ?1", params![key])
            .map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        tx.execute(
            "INSERT INTO vectors (key, embedding) VALUES (?1, ?2)",
            params![key, embedding_to_bytes(vector)],
        )
        .map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO vector_meta \
             (key, id, namespace, owner_id, domain, created_at, content) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key,
                id,
                namespace,
                meta.owner_id,
                meta.domain,
                meta.created_at,
                meta.content,
            ],
        )
        .map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        tx.commit()
            .map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<VectorHit>> {
        let conn = self.lock()?;

        // KNN over the whole table, then filter. Headroom for neighbors
        // that belong to other namespaces or owners.
        let candidate_limit = (top_k * 8).max(32);
        let mut stmt = conn
            .prepare(
                "SELECT key, distance FROM vectors \
                 WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            )
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?;

        let candidates: Vec<(String, f64)> = stmt
            .query_map(
                params![embedding_to_bytes(vector), candidate_limit as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?;

        let mut hits = Vec::new();
        for (key, distance) in candidates {
            let hit = conn
                .query_row(
                    "SELECT id, namespace, owner_id, domain, created_at, content \
                     FROM vector_meta WHERE key = ?1 AND namespace = ?2 AND owner_id = ?3",
                    params![key, namespace, filter.owner_id],
                    |row| row_to_hit(row, l2_to_cosine(distance)),
                )
                .optional()
                .map_err(|e| TroveError::IndexQuery(e.to_string()))?;
            if let Some(hit) = hit {
                hits.push(hit);
                if hits.len() >= top_k {
                    break;
                }
            }
        }
        Ok(hits)
    }

    async fn recent(
        &self,
        namespace: &str,
        filter: &IndexFilter,
        cutoff: &str,
    ) -> Result<Vec<VectorHit>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, namespace, owner_id, domain, created_at, content \
                 FROM vector_meta \
                 WHERE namespace = ?1 AND owner_id = ?2 AND created_at >= ?3 \
                 ORDER BY created_at DESC",
            )
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?;

        let hits = stmt
            .query_map(params![namespace, filter.owner_id, cutoff], |row| {
                row_to_hit(row, 0.0)
            })
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TroveError::IndexQuery(e.to_string()))?;
        Ok(hits)
    }

    async fn delete_many(&self, namespace: &str, filter: &IndexFilter) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        tx.execute(
            "DELETE FROM vectors WHERE key IN \
             (SELECT key FROM vector_meta WHERE namespace = ?1 AND owner_id = ?2)",
            params![namespace, filter.owner_id],
        )
        .map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        tx.execute(
            "DELETE FROM vector_meta WHERE namespace = ?1 AND owner_id = ?2",
            params![namespace, filter.owner_id],
        )
        .map_err(|e| TroveError::IndexWrite(e.to_string()))?;

        tx.commit()
            .map_err(|e| TroveError::IndexWrite(e.to_string()))?;
        Ok(())
    }
}

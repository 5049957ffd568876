//! Storage service adapters.
//!
//! Three heterogeneous stores sit behind traits: the durable [`RecordStore`]
//! (authoritative, with a change feed), the [`VectorIndex`] (a rebuildable
//! similarity projection), and the [`ArchiveStore`] (a path-addressed,
//! versioned replica). No transaction spans them; the dual write is a
//! documented two-step, store-first sequence.

pub mod archive;
pub mod index;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Dashboard, Entry};

// ── Change feed ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Modify,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Modify => "modify",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "modify" => Ok(Self::Modify),
            _ => Err(format!("unknown change type: {s}")),
        }
    }
}

/// Full image of the changed record, serialized into the feed row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRecord {
    Entry(Entry),
    Dashboard(Dashboard),
}

/// One ordered event from the durable store's change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Monotonically increasing sequence number (the consumer's cursor).
    pub seq: i64,
    pub change: ChangeType,
    pub record: ChangeRecord,
}

// ── Durable record store ──────────────────────────────────────────────────────

/// Key-value store keyed by (owner, id) for entries and (owner, domain) for
/// dashboards. Every operation is scoped by owner identity.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_entry(&self, entry: &Entry) -> Result<()>;

    async fn get_entry(&self, owner_id: &str, id: &str) -> Result<Option<Entry>>;

    /// Batch hydration by id. Missing ids are silently absent from the result.
    async fn entries_by_ids(&self, owner_id: &str, ids: &[String]) -> Result<Vec<Entry>>;

    /// Bump `last_accessed` on recalled entries. Bookkeeping only; does not
    /// count as a mutation for change-feed purposes.
    async fn touch_last_accessed(&self, owner_id: &str, ids: &[String]) -> Result<()>;

    /// Atomic full-document dashboard write. Inserts or replaces.
    async fn put_dashboard(&self, dashboard: &Dashboard) -> Result<()>;

    async fn get_dashboard(&self, owner_id: &str, domain: &str) -> Result<Option<Dashboard>>;

    /// Ordered change events with `seq > after_seq`, up to `limit`.
    async fn changes_since(&self, after_seq: i64, limit: usize) -> Result<Vec<ChangeEvent>>;
}

// ── Vector index ──────────────────────────────────────────────────────────────

/// Projection metadata stored alongside each vector. `content` is
/// denormalized entry text for fast-path hydration; when absent the recall
/// engine falls back to the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMeta {
    pub owner_id: String,
    pub domain: String,
    pub created_at: String,
    pub content: Option<String>,
}

/// A ranked hit from a similarity or recency query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity for relevance queries; 0.0 for recency-only hits.
    pub score: f64,
    /// Namespace the hit came from, tagged for cross-domain fusion.
    pub namespace: String,
    pub meta: VectorMeta,
}

/// Mandatory owner scoping on every index query; multi-tenant isolation is
/// a filter, not a convenience.
#[derive(Debug, Clone)]
pub struct IndexFilter {
    pub owner_id: String,
}

/// Namespaced similarity index holding per-entry projections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        vector: &[f32],
        meta: &VectorMeta,
    ) -> Result<()>;

    /// Top-K nearest neighbors within one namespace, owner-filtered.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<VectorHit>>;

    /// All vectors with `created_at >= cutoff` (RFC 3339), independent of
    /// similarity.
    async fn recent(
        &self,
        namespace: &str,
        filter: &IndexFilter,
        cutoff: &str,
    ) -> Result<Vec<VectorHit>>;

    async fn delete_many(&self, namespace: &str, filter: &IndexFilter) -> Result<()>;
}

// ── Archival blob store ───────────────────────────────────────────────────────

/// A file fetched from the archive, with its opaque version token.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub content: String,
    pub version: String,
}

/// Path-addressed versioned file store. `put_file` with an expected version
/// token fails with a version conflict if the file changed underneath,
/// optimistic concurrency against lost updates on concurrent appends.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn get_file(&self, path: &str) -> Result<Option<ArchiveFile>>;

    async fn put_file(
        &self,
        path: &str,
        content: &str,
        expected_version: Option<&str>,
    ) -> Result<()>;
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert an L2 distance between unit vectors to cosine similarity.
///
/// For normalized vectors, `d² = 2(1 - cos)`, so `cos = 1 - d²/2`.
pub fn l2_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

//! Context retrieval: recency + relevance fusion over the vector index.
//!
//! Relevance mode ranks by cosine similarity within one namespace; recency
//! mode takes everything newer than a sliding cutoff. Cross-domain queries
//! fan out over every namespace concurrently and fuse the hits: sort by
//! score descending, break ties by recency (newer wins), truncate to a cap.
//! Zero matches is a degraded-but-normal state that renders to an empty
//! context string.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use crate::config::RecallSettings;
use crate::error::Result;
use crate::store::{IndexFilter, RecordStore, VectorHit, VectorIndex};

/// One piece of recall context, tagged with the namespace it came from.
#[derive(Debug, Clone)]
pub struct ContextSnippet {
    pub id: String,
    pub namespace: String,
    pub content: String,
    pub score: f64,
    pub created_at: String,
}

pub struct RecallEngine {
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn RecordStore>,
    settings: RecallSettings,
}

impl RecallEngine {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn RecordStore>,
        settings: RecallSettings,
    ) -> Self {
        Self {
            index,
            store,
            settings,
        }
    }

    /// Top-K nearest neighbors within one namespace.
    pub async fn relevant(
        &self,
        owner_id: &str,
        namespace: &str,
        vector: &[f32],
    ) -> Result<Vec<ContextSnippet>> {
        let filter = IndexFilter {
            owner_id: owner_id.to_string(),
        };
        let hits = self
            .index
            .query(namespace, vector, self.settings.top_k, &filter)
            .await?;
        self.hydrate(owner_id, hits).await
    }

    /// Everything newer than the configured sliding window, unranked by
    /// similarity.
    pub async fn recent(&self, owner_id: &str, namespace: &str) -> Result<Vec<ContextSnippet>> {
        let filter = IndexFilter {
            owner_id: owner_id.to_string(),
        };
        let cutoff = (chrono::Utc::now()
            - chrono::Duration::days(self.settings.recency_days))
        .to_rfc3339();
        let hits = self.index.recent(namespace, &filter, &cutoff).await?;
        self.hydrate(owner_id, hits).await
    }

    /// Relevance plus recency within one domain, deduplicated and fused.
    /// Used by the ingestion path to build synthesis context around a new
    /// entry's own vector.
    pub async fn within_domain(
        &self,
        owner_id: &str,
        namespace: &str,
        vector: &[f32],
    ) -> Result<Vec<ContextSnippet>> {
        let by_relevance = self.relevant(owner_id, namespace, vector).await?;
        let by_recency = self.recent(owner_id, namespace).await?;

        let mut merged = by_relevance;
        merged.extend(by_recency);
        Ok(fuse(merged, self.settings.fusion_cap))
    }

    /// Cross-domain "ask anything" fusion: query every namespace in
    /// parallel, tag hits with their source namespace, merge, sort, cap.
    /// A failed branch contributes an empty result, not an abort.
    pub async fn fused(
        &self,
        owner_id: &str,
        namespaces: &[String],
        vector: &[f32],
    ) -> Result<Vec<ContextSnippet>> {
        let filter = IndexFilter {
            owner_id: owner_id.to_string(),
        };

        let branches = namespaces.iter().map(|ns| {
            let filter = filter.clone();
            async move {
                match self
                    .index
                    .query(ns, vector, self.settings.top_k, &filter)
                    .await
                {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(namespace = %ns, error = %e, "recall branch failed");
                        Vec::new()
                    }
                }
            }
        });

        let hits: Vec<VectorHit> = join_all(branches).await.into_iter().flatten().collect();
        let snippets = self.hydrate(owner_id, hits).await?;
        Ok(fuse(snippets, self.settings.fusion_cap))
    }

    /// Turn index hits into snippets. Denormalized metadata content is the
    /// fast path; anything missing it is batch-fetched from the durable
    /// store. Hydrated entries get a `last_accessed` bump.
    async fn hydrate(&self, owner_id: &str, hits: Vec<VectorHit>) -> Result<Vec<ContextSnippet>> {
        let mut snippets = Vec::with_capacity(hits.len());
        let mut missing: Vec<(usize, String)> = Vec::new();

        for hit in hits {
            let slot = snippets.len();
            match &hit.meta.content {
                Some(content) => snippets.push(ContextSnippet {
                    id: hit.id,
                    namespace: hit.namespace,
                    content: content.clone(),
                    score: hit.score,
                    created_at: hit.meta.created_at,
                }),
                None => {
                    missing.push((slot, hit.id.clone()));
                    snippets.push(ContextSnippet {
                        id: hit.id,
                        namespace: hit.namespace,
                        content: String::new(),
                        score: hit.score,
                        created_at: hit.meta.created_at,
                    });
                }
            }
        }

        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(|(_, id)| id.clone()).collect();
            let entries = self.store.entries_by_ids(owner_id, &ids).await?;
            for (slot, id) in &missing {
                if let Some(entry) = entries.iter().find(|e| &e.id == id) {
                    snippets[*slot].content = entry.content.clone();
                }
            }
        }

        // Drop hits that hydrated to nothing (index ahead of store, or purged)
        snippets.retain(|s| !s.content.is_empty());

        let accessed: Vec<String> = snippets.iter().map(|s| s.id.clone()).collect();
        if !accessed.is_empty() {
            if let Err(e) = self.store.touch_last_accessed(owner_id, &accessed).await {
                tracing::warn!(error = %e, "last_accessed bookkeeping failed");
            }
        }

        Ok(snippets)
    }
}

/// Fusion policy: dedup by id (best score wins), sort strictly descending by
/// score with recency tie-break (newer first), truncate to `cap`.
pub fn fuse(snippets: Vec<ContextSnippet>, cap: usize) -> Vec<ContextSnippet> {
    let mut best: Vec<ContextSnippet> = Vec::with_capacity(snippets.len());
    let mut seen: HashSet<String> = HashSet::new();

    let mut sorted = snippets;
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    for snippet in sorted {
        if seen.insert(snippet.id.clone()) {
            best.push(snippet);
            if best.len() >= cap {
                break;
            }
        }
    }
    best
}

/// Render snippets into the context block handed to synthesis. Zero snippets
/// is an empty string ("no evidence"), not an error.
pub fn render_context(snippets: &[ContextSnippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("- [{}] ({}) {}", s.namespace, s.created_at, s.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(id: &str, score: f64, created_at: &str) -> ContextSnippet {
        ContextSnippet {
            id: id.into(),
            namespace: "test".into(),
            content: format!("content of {id}"),
            score,
            created_at: created_at.into(),
        }
    }

    #[test]
    fn fuse_sorts_descending_by_score() {
        let fused = fuse(
            vec![
                snippet("low", 0.2, "2026-08-01T00:00:00Z"),
                snippet("high", 0.9, "2026-08-01T00:00:00Z"),
                snippet("mid", 0.5, "2026-08-01T00:00:00Z"),
            ],
            10,
        );
        let ids: Vec<&str> = fused.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn fuse_breaks_ties_by_recency() {
        let fused = fuse(
            vec![
                snippet("older", 0.5, "2026-08-01T00:00:00Z"),
                snippet("newer", 0.5, "2026-08-20T00:00:00Z"),
            ],
            10,
        );
        assert_eq!(fused[0].id, "newer");
    }

    #[test]
    fn fuse_truncates_to_cap() {
        let many: Vec<ContextSnippet> = (0..30)
            .map(|i| snippet(&format!("s{i}"), i as f64 / 30.0, "2026-08-01T00:00:00Z"))
            .collect();
        assert_eq!(fuse(many, 15).len(), 15);
    }

    #[test]
    fn fuse_dedups_by_id_keeping_best_score() {
        let fused = fuse(
            vec![
                snippet("dup", 0.3, "2026-08-01T00:00:00Z"),
                snippet("dup", 0.8, "2026-08-01T00:00:00Z"),
            ],
            10,
        );
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_context_renders_to_empty_string() {
        assert_eq!(render_context(&[]), "");
    }

    #[test]
    fn context_lines_carry_namespace_tags() {
        let rendered = render_context(&[snippet("a", 0.9, "2026-08-01T00:00:00Z")]);
        assert!(rendered.starts_with("- [test]"));
        assert!(rendered.contains("content of a"));
    }
}

//! The ingestion orchestrator: one state machine, configured per domain.
//!
//! Every request is an independent, stateless invocation walking a strict
//! sequence: classify → embed → durable write → index upsert → recall →
//! synthesize → dashboard write. The dual write is best-effort and ordered
//! for recoverability: the durable store commits first, and an index failure
//! leaves the entry saved but unsearchable (a normal, self-healing state)
//! rather than failing the request. Dashboard persistence is one atomic
//! full-document write with the original creation timestamp carried through.

use std::sync::Arc;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::domains::{DomainRegistry, READING_LIST};
use crate::error::{Result, TroveError};
use crate::oracle::EmbeddingOracle;
use crate::recall::{render_context, RecallEngine};
use crate::router::IntentRouter;
use crate::store::{RecordStore, VectorIndex, VectorMeta};
use crate::synth::Synthesizer;
use crate::types::{Classification, Dashboard, Entry, Intent, MediaType};

/// Result of a persisted ingestion.
#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub entry_id: String,
    pub dashboard_updated: bool,
    /// `false` when the index upsert failed and the entry is saved but
    /// temporarily unsearchable.
    pub indexed: bool,
}

/// Result of the read-only query path.
#[derive(Debug, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Ids of the entries cited as evidence.
    pub sources: Vec<String>,
}

/// What an `ingest` call did, depending on the classified intent.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestReply {
    Saved(IngestOutcome),
    Answered(QueryAnswer),
}

pub struct Pipeline {
    router: IntentRouter,
    embedder: Arc<dyn EmbeddingOracle>,
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    recall: RecallEngine,
    synth: Synthesizer,
    domains: DomainRegistry,
    settings: PipelineConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: IntentRouter,
        embedder: Arc<dyn EmbeddingOracle>,
        store: Arc<dyn RecordStore>,
        index: Arc<dyn VectorIndex>,
        recall: RecallEngine,
        synth: Synthesizer,
        domains: DomainRegistry,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            router,
            embedder,
            store,
            index,
            recall,
            synth,
            domains,
            settings,
        }
    }

    /// Full ingestion entry point: classify, then branch on intent.
    pub async fn ingest(
        &self,
        owner_id: &str,
        raw: &str,
        domain_name: &str,
        media_type: MediaType,
    ) -> Result<IngestReply> {
        // Classification is fail-fast: a malformed verdict surfaces to the
        // caller before anything is persisted.
        let verdict = self.router.classify(raw, media_type).await?;

        match verdict.intent {
            Intent::Query => {
                let answer = self.query(owner_id, raw).await?;
                Ok(IngestReply::Answered(answer))
            }
            Intent::LogReading => {
                let outcome = self.apply_reading_log(owner_id, raw, &verdict).await?;
                Ok(IngestReply::Saved(outcome))
            }
            Intent::Save => {
                let outcome = self
                    .persist_and_synthesize(owner_id, raw, domain_name, &verdict)
                    .await?;
                Ok(IngestReply::Saved(outcome))
            }
        }
    }

    /// `save(content)`: capture into a domain, defaulting the configured one.
    pub async fn save(
        &self,
        owner_id: &str,
        raw: &str,
        domain_name: Option<&str>,
        media_type: MediaType,
    ) -> Result<IngestReply> {
        let domain = domain_name.unwrap_or(&self.settings.default_domain);
        self.ingest(owner_id, raw, domain, media_type).await
    }

    /// `query(question)`: read-only: fused cross-domain recall plus one
    /// answer-synthesis call. Nothing is persisted.
    pub async fn query(&self, owner_id: &str, question: &str) -> Result<QueryAnswer> {
        let vector = self.embedder.embed(question).await?;
        let namespaces = self.domains.namespaces();
        let snippets = self.recall.fused(owner_id, &namespaces, &vector).await?;

        let context = render_context(&snippets);
        let answer = self.synth.answer(question, &context).await?;
        let sources = snippets.iter().map(|s| s.id.clone()).collect();

        tracing::info!(
            owner = %owner_id,
            cited = snippets.len(),
            "query answered"
        );
        Ok(QueryAnswer { answer, sources })
    }

    /// `refresh(domain)`: polish-only synthesis pass with no new entry,
    /// using recent history as a fact-check source.
    pub async fn refresh(&self, owner_id: &str, domain_name: &str) -> Result<bool> {
        let domain = self
            .domains
            .get(domain_name)
            .ok_or_else(|| TroveError::UnknownDomain(domain_name.to_string()))?;

        let dashboard = self
            .store
            .get_dashboard(owner_id, &domain.name)
            .await?
            .unwrap_or_else(|| Dashboard::seeded(owner_id, &domain.name, &domain.template));

        let snippets = self.recall.recent(owner_id, &domain.namespace).await?;
        let context = render_context(&snippets);

        let content = self
            .synth
            .synthesize(&dashboard.content, None, Intent::Save, &context, domain)
            .await?;

        self.persist_dashboard(dashboard, content).await?;
        tracing::info!(owner = %owner_id, domain = %domain_name, "dashboard refreshed");
        Ok(true)
    }

    /// `logReading(text)`: persist the note as an entry in the reading-list
    /// domain, then merge only the current-reading subsection instead of a
    /// full dashboard rewrite.
    pub async fn log_reading(&self, owner_id: &str, raw: &str) -> Result<IngestOutcome> {
        let verdict = self.router.classify(raw, MediaType::Text).await?;
        self.apply_reading_log(owner_id, raw, &verdict).await
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Steps 3–7 of the state machine for the `save` path.
    async fn persist_and_synthesize(
        &self,
        owner_id: &str,
        raw: &str,
        domain_name: &str,
        verdict: &Classification,
    ) -> Result<IngestOutcome> {
        let domain = self
            .domains
            .get(domain_name)
            .ok_or_else(|| TroveError::UnknownDomain(domain_name.to_string()))?;

        let (entry, vector, indexed) = self
            .persist_entry(owner_id, raw, &domain.name, &domain.namespace, verdict)
            .await?;

        // Recall around the entry's own vector. A degraded recall branch
        // yields empty context, not a failed ingestion; the entry is
        // already durable.
        let context = match self
            .entry_context(owner_id, &domain.namespace, &entry, &vector)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "recall degraded, synthesizing without context");
                String::new()
            }
        };

        let dashboard = self
            .store
            .get_dashboard(owner_id, &domain.name)
            .await?
            .unwrap_or_else(|| Dashboard::seeded(owner_id, &domain.name, &domain.template));

        let content = self
            .synth
            .synthesize(&dashboard.content, Some(&entry), verdict.intent, &context, domain)
            .await
            .map_err(|e| attach_entry(e, &entry.id))?;

        self.persist_dashboard(dashboard, content).await?;

        tracing::info!(
            owner = %owner_id,
            domain = %domain_name,
            entry = %entry.id,
            indexed,
            "entry ingested"
        );
        Ok(IngestOutcome {
            entry_id: entry.id,
            dashboard_updated: true,
            indexed,
        })
    }

    /// Dual write: durable store first (source of truth), index second.
    /// The reverse order is never acceptable: it could make un-stored
    /// content appear searchable.
    async fn persist_entry(
        &self,
        owner_id: &str,
        raw: &str,
        domain_name: &str,
        namespace: &str,
        verdict: &Classification,
    ) -> Result<(Entry, Vec<f32>, bool)> {
        // Verbatim override: for text media the user's words are
        // authoritative, the router's `content` is advisory only.
        let content = match verdict.media_type {
            MediaType::Text => raw.to_string(),
            MediaType::Audio | MediaType::Image => verdict.content.clone(),
        };

        let entry = Entry::from_classification(owner_id, domain_name, content, verdict);
        let vector = self.embedder.embed(&entry.content).await?;

        self.store.put_entry(&entry).await?;

        let meta = VectorMeta {
            owner_id: owner_id.to_string(),
            domain: domain_name.to_string(),
            created_at: entry.created_at.clone(),
            content: Some(entry.content.clone()),
        };
        let indexed = match self.index.upsert(namespace, &entry.id, &vector, &meta).await {
            Ok(()) => true,
            Err(e) => {
                // Saved but unsearchable until a repair pass; degraded, not failed
                tracing::warn!(entry = %entry.id, error = %e, "index upsert failed");
                false
            }
        };

        Ok((entry, vector, indexed))
    }

    /// Recall reuses the vector already computed for the index upsert;
    /// the entry's content is never embedded twice.
    async fn entry_context(
        &self,
        owner_id: &str,
        namespace: &str,
        entry: &Entry,
        vector: &[f32],
    ) -> Result<String> {
        let mut snippets = self.recall.within_domain(owner_id, namespace, vector).await?;
        // The entry itself is not evidence for itself
        snippets.retain(|s| s.id != entry.id);
        Ok(render_context(&snippets))
    }

    /// Persist entry, then read-merge-write the current-reading subsection.
    async fn apply_reading_log(
        &self,
        owner_id: &str,
        raw: &str,
        verdict: &Classification,
    ) -> Result<IngestOutcome> {
        let domain = self
            .domains
            .get(READING_LIST)
            .ok_or_else(|| TroveError::UnknownDomain(READING_LIST.to_string()))?;

        let (entry, _vector, indexed) = self
            .persist_entry(owner_id, raw, &domain.name, &domain.namespace, verdict)
            .await?;

        let dashboard = self
            .store
            .get_dashboard(owner_id, &domain.name)
            .await?
            .unwrap_or_else(|| Dashboard::seeded(owner_id, &domain.name, &domain.template));

        let content = self
            .synth
            .update_reading_section(&dashboard.content, &entry)
            .await
            .map_err(|e| attach_entry(e, &entry.id))?;

        self.persist_dashboard(dashboard, content).await?;

        tracing::info!(owner = %owner_id, entry = %entry.id, "reading log applied");
        Ok(IngestOutcome {
            entry_id: entry.id,
            dashboard_updated: true,
            indexed,
        })
    }

    /// One atomic full-document write, preserving the original creation
    /// timestamp across rewrites.
    async fn persist_dashboard(&self, previous: Dashboard, content: String) -> Result<()> {
        let updated = Dashboard {
            owner_id: previous.owner_id,
            domain: previous.domain,
            content,
            created_at: previous.created_at,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.put_dashboard(&updated).await
    }
}

/// Tag a synthesis failure with the already-committed entry so the caller
/// can tell "saved but dashboard stale" from "nothing saved".
fn attach_entry(err: TroveError, entry_id: &str) -> TroveError {
    match err {
        TroveError::Synthesis { reason, .. } => TroveError::Synthesis {
            reason,
            entry_id: Some(entry_id.to_string()),
        },
        other => other,
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use trove::config::{PipelineConfig, RecallSettings};
use trove::domains::DomainRegistry;
use trove::error::{Result, TroveError};
use trove::ingest::Pipeline;
use trove::oracle::{EmbeddingOracle, GenerationOracle, EMBEDDING_DIM};
use trove::recall::RecallEngine;
use trove::router::IntentRouter;
use trove::store::index::SqliteVectorIndex;
use trove::store::sqlite::SqliteRecordStore;
use trove::store::{IndexFilter, RecordStore, VectorHit, VectorIndex, VectorMeta};
use trove::synth::Synthesizer;

/// Generation oracle that replays a fixed script of responses in order.
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedOracle {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        })
    }
}

#[async_trait]
impl GenerationOracle for ScriptedOracle {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TroveError::Oracle("scripted oracle ran out of responses".into()))
    }
}

/// Deterministic embedder: a unit spike at a position derived from the text,
/// so identical texts collide and different texts are orthogonal-ish.
pub struct SpikeEmbedder;

#[async_trait]
impl EmbeddingOracle for SpikeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(test_embedding(
            text.bytes().fold(0u8, |acc, b| acc.wrapping_add(b)),
        ))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// [`SpikeEmbedder`] that also counts how many times `embed` was called.
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingOracle for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SpikeEmbedder.embed(text).await
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed as usize % EMBEDDING_DIM] = 1.0;
    v
}

/// Embedding similar to `base`: small perturbation, then L2 normalized.
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..5 {
        v[(i * 37) % EMBEDDING_DIM] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Vector index whose writes always fail; queries return nothing.
/// Exercises the saved-but-unsearchable degraded path.
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(
        &self,
        _namespace: &str,
        _id: &str,
        _embedding: &[f32],
        _meta: &VectorMeta,
    ) -> Result<()> {
        Err(TroveError::IndexWrite("index unavailable".into()))
    }

    async fn query(
        &self,
        _namespace: &str,
        _embedding: &[f32],
        _top_k: usize,
        _filter: &IndexFilter,
    ) -> Result<Vec<VectorHit>> {
        Ok(Vec::new())
    }

    async fn recent(
        &self,
        _namespace: &str,
        _filter: &IndexFilter,
        _cutoff: &str,
    ) -> Result<Vec<VectorHit>> {
        Ok(Vec::new())
    }

    async fn delete_many(&self, _namespace: &str, _filter: &IndexFilter) -> Result<()> {
        Ok(())
    }
}

/// A router verdict as the oracle would emit it.
pub fn verdict_json(intent: &str, content: &str) -> String {
    format!(
        r#"{{"intent": "{intent}", "content": "{content}", "is_original": true,
            "source_url": null, "source_title": null, "source_author": null,
            "tags": []}}"#
    )
}

pub fn test_settings() -> RecallSettings {
    RecallSettings {
        top_k: 8,
        fusion_cap: 15,
        recency_days: 14,
    }
}

pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        owner_id: "casey".into(),
        default_domain: "life_log".into(),
        log_level: "warn".into(),
    }
}

/// Wire a full pipeline over in-memory stores and a scripted oracle.
pub fn build_pipeline(oracle: Arc<ScriptedOracle>) -> (Pipeline, Arc<dyn RecordStore>) {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
    (
        pipeline_with(oracle, store.clone(), index),
        store,
    )
}

/// Same as [`build_pipeline`] but with a caller-supplied index.
pub fn pipeline_with(
    oracle: Arc<ScriptedOracle>,
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
) -> Pipeline {
    pipeline_with_embedder(oracle, store, index, Arc::new(SpikeEmbedder))
}

/// Fully explicit wiring for tests that instrument the embedder too.
pub fn pipeline_with_embedder(
    oracle: Arc<ScriptedOracle>,
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingOracle>,
) -> Pipeline {
    let recall = RecallEngine::new(index.clone(), store.clone(), test_settings());
    Pipeline::new(
        IntentRouter::new(oracle.clone()),
        embedder,
        store,
        index,
        recall,
        Synthesizer::new(oracle),
        DomainRegistry::default(),
        test_pipeline_config(),
    )
}

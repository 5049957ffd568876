//! Oracle clients for OpenAI-compatible REST APIs.
//!
//! Both clients carry bounded connect and request timeouts; a timed-out call
//! fails the request that issued it.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::OracleConfig;
use crate::error::{Result, TroveError};
use crate::oracle::{EmbeddingOracle, GenerationOracle, EMBEDDING_DIM};

const CONNECT_TIMEOUT_SECS: u64 = 10;

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TroveError::Oracle(format!("failed to build http client: {e}")))
}

/// Chat-completions client used for classification and synthesis.
pub struct HttpGenerationOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpGenerationOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.generation_model.clone(),
        })
    }
}

#[async_trait]
impl GenerationOracle for HttpGenerationOracle {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TroveError::Oracle(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TroveError::Oracle(format!(
                "generation request returned {status}: {detail}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TroveError::Oracle(format!("generation response not JSON: {e}")))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                TroveError::Oracle("generation response missing message content".into())
            })
    }
}

/// Embeddings client.
pub struct HttpEmbeddingOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbeddingOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingOracle for HttpEmbeddingOracle {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": text,
            "dimensions": EMBEDDING_DIM,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TroveError::Oracle(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TroveError::Oracle(format!(
                "embedding request returned {status}: {detail}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TroveError::Oracle(format!("embedding response not JSON: {e}")))?;

        let vector: Vec<f32> = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| TroveError::Oracle("embedding response missing vector".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != EMBEDDING_DIM {
            return Err(TroveError::Oracle(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIM}",
                vector.len()
            )));
        }

        Ok(vector)
    }
}

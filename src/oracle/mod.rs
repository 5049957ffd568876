//! Black-box oracle interfaces.
//!
//! The generation oracle is text-in/text-out with no structured-output
//! guarantee, so every caller parses defensively. The embedding oracle maps
//! text to L2-normalized vectors of exactly [`EMBEDDING_DIM`] dimensions.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;

/// Number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 768;

/// Text-generation oracle: a system-style instruction plus user content in,
/// plain text out.
#[async_trait]
pub trait GenerationOracle: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// Text-embedding oracle.
#[async_trait]
pub trait EmbeddingOracle: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Number of dimensions this oracle produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Strip code-fence wrapping that generation oracles like to add around
/// structured output (e.g. ```json ... ```). Mandatory post-processing on
/// every oracle response that gets parsed or persisted.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    // Drop the opening fence (possibly carrying a language tag)
    lines.remove(0);
    if let Some(last) = lines.last() {
        if last.trim() == "```" {
            lines.pop();
        }
    }
    lines.join("\n").trim().to_string()
}

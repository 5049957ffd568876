//! Intent classification via the generation oracle.
//!
//! [`IntentRouter::classify`] runs two independent classifications in one
//! call: *intent* (save vs. question vs. reading-log update) and *provenance*
//! (original words vs. quoted material plus attribution). The oracle's output
//! is parsed defensively into a strict schema; non-JSON or schema-invalid
//! output is a hard [`TroveError::Classification`], never retried silently.

use serde::Deserialize;
use std::sync::Arc;

use crate::error::{Result, TroveError};
use crate::oracle::{strip_code_fences, GenerationOracle};
use crate::types::{Classification, Intent, MediaType};

const CLASSIFY_SYSTEM: &str = "\
You are the intake classifier for a personal knowledge archive. Given one \
piece of user input, respond with a single JSON object and nothing else:\n\
{\n\
  \"intent\": \"save\" | \"query\" | \"log_reading\",\n\
  \"content\": string,        // the knowledge worth keeping, cleaned up\n\
  \"is_original\": boolean,   // true if these are the user's own words\n\
  \"source_url\": string|null,\n\
  \"source_title\": string|null,\n\
  \"source_author\": string|null,\n\
  \"tags\": [string]\n\
}\n\
Classify intent and provenance independently: a quoted article is still a \
\"save\". Use \"query\" only when the user is asking their archive a \
question, and \"log_reading\" only when they report progress in a book or \
article they are reading.";

/// Raw verdict shape expected from the oracle. Parsed before any validation
/// so a malformed field reports as a schema error with the raw text attached.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    intent: String,
    content: String,
    is_original: bool,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    source_title: Option<String>,
    #[serde(default)]
    source_author: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct IntentRouter {
    oracle: Arc<dyn GenerationOracle>,
}

impl IntentRouter {
    pub fn new(oracle: Arc<dyn GenerationOracle>) -> Self {
        Self { oracle }
    }

    /// Classify raw input into a structured verdict.
    ///
    /// The returned `content` is advisory for non-text media; for text input
    /// the orchestrator overrides it with the raw input verbatim.
    pub async fn classify(&self, raw: &str, media_type: MediaType) -> Result<Classification> {
        let user = format!("[media: {media_type}]\n{raw}");
        let response = self.oracle.generate(CLASSIFY_SYSTEM, &user).await?;

        let verdict = parse_verdict(&response)?;

        tracing::debug!(
            intent = %verdict.intent,
            is_original = verdict.is_original,
            tags = verdict.tags.len(),
            "input classified"
        );

        Ok(Classification {
            media_type,
            ..verdict
        })
    }
}

/// Defensive decode of oracle output: strip fences, parse JSON, validate the
/// intent value. Every failure carries the raw text for diagnostics.
fn parse_verdict(response: &str) -> Result<Classification> {
    let cleaned = strip_code_fences(response);

    let raw: RawVerdict =
        serde_json::from_str(&cleaned).map_err(|e| TroveError::Classification {
            reason: format!("oracle output is not valid verdict JSON: {e}"),
            raw: response.to_string(),
        })?;

    let intent: Intent = raw
        .intent
        .parse()
        .map_err(|e: String| TroveError::Classification {
            reason: e,
            raw: response.to_string(),
        })?;

    if raw.content.trim().is_empty() {
        return Err(TroveError::Classification {
            reason: "verdict content is empty".into(),
            raw: response.to_string(),
        });
    }

    Ok(Classification {
        intent,
        content: raw.content,
        is_original: raw.is_original,
        source_url: raw.source_url.filter(|s| !s.is_empty()),
        source_title: raw.source_title.filter(|s| !s.is_empty()),
        source_author: raw.source_author.filter(|s| !s.is_empty()),
        media_type: MediaType::Text, // caller-supplied; replaced in classify()
        tags: raw.tags,
    })
}

//! Error taxonomy for the pipeline.
//!
//! Variants are grouped by which stage failed, because callers care about
//! one distinction above all: did the failure happen before or after the
//! entry became durable?

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TroveError>;

#[derive(Debug, Error)]
pub enum TroveError {
    /// The router could not produce a usable verdict. Nothing was persisted.
    #[error("classification failed: {reason}")]
    Classification { reason: String, raw: String },

    #[error("record store write failed: {0}")]
    StorageWrite(String),

    #[error("record store read failed: {0}")]
    StorageRead(String),

    #[error("vector index write failed: {0}")]
    IndexWrite(String),

    #[error("vector index query failed: {0}")]
    IndexQuery(String),

    /// Dashboard synthesis failed. When `entry_id` is set, the entry is
    /// already durable and only the dashboard is stale.
    #[error("synthesis failed: {reason}")]
    Synthesis {
        reason: String,
        entry_id: Option<String>,
    },

    #[error("archival of {path} failed: {reason}")]
    Archival { path: String, reason: String },

    /// Conditional archive write lost the race against a newer version.
    #[error("version conflict writing {path}")]
    VersionConflict { path: String },

    /// Transport or protocol failure talking to the AI oracle.
    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),
}

impl TroveError {
    /// Whether the entry reached durable storage despite this error.
    /// Index and post-commit synthesis failures degrade the pipeline but
    /// never lose the user's words.
    pub fn entry_was_saved(&self) -> bool {
        matches!(
            self,
            TroveError::IndexWrite(_)
                | TroveError::Synthesis {
                    entry_id: Some(_),
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_state_is_visible_on_post_commit_failures() {
        assert!(TroveError::IndexWrite("disk full".into()).entry_was_saved());
        assert!(TroveError::Synthesis {
            reason: "empty output".into(),
            entry_id: Some("abc".into()),
        }
        .entry_was_saved());

        assert!(!TroveError::Synthesis {
            reason: "empty output".into(),
            entry_id: None,
        }
        .entry_was_saved());
        assert!(!TroveError::Classification {
            reason: "bad json".into(),
            raw: "oops".into(),
        }
        .entry_was_saved());
    }
}

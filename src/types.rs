//! Core record types shared across the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the router decided an input is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Persist the thought and weave it into its domain dashboard.
    Save,
    /// Answer from what is already saved; persist nothing.
    Query,
    /// Reading-progress note for the reading list.
    LogReading,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Save => "save",
            Intent::Query => "query",
            Intent::LogReading => "log_reading",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "save" => Ok(Intent::Save),
            "query" => Ok(Intent::Query),
            "log_reading" => Ok(Intent::LogReading),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// How the raw input arrived. Non-text media carry the router's description
/// as their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Text,
    Audio,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Audio => "audio",
            MediaType::Image => "image",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MediaType::Text),
            "audio" => Ok(MediaType::Audio),
            "image" => Ok(MediaType::Image),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// The router's structured verdict on one raw input.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    /// Cleaned or transcribed content. Advisory for text media, where the
    /// user's raw words win.
    pub content: String,
    /// Whether the thought is the owner's own, as opposed to quoted material.
    pub is_original: bool,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub source_author: Option<String>,
    pub media_type: MediaType,
    pub tags: Vec<String>,
}

/// One captured thought. Immutable after insert except for last-accessed
/// bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub owner_id: String,
    pub domain: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_original: bool,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub source_author: Option<String>,
    pub media_type: MediaType,
    pub tags: Vec<String>,
    pub last_accessed: Option<String>,
    #[serde(default)]
    pub skip_backup: bool,
}

impl Entry {
    /// Mint a new entry from a router verdict. UUID v7 ids sort by creation
    /// time, which keeps archival paths and scans cheap.
    pub fn from_classification(
        owner_id: &str,
        domain: &str,
        content: String,
        verdict: &Classification,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            domain: domain.to_string(),
            content,
            created_at: now.clone(),
            updated_at: now,
            is_original: verdict.is_original,
            source_url: verdict.source_url.clone(),
            source_title: verdict.source_title.clone(),
            source_author: verdict.source_author.clone(),
            media_type: verdict.media_type,
            tags: verdict.tags.clone(),
            last_accessed: None,
            skip_backup: false,
        }
    }
}

/// A living markdown document, one per (owner, domain). Rewritten whole on
/// every synthesis pass; `created_at` survives rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub owner_id: String,
    pub domain: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Dashboard {
    /// A fresh dashboard seeded from its domain template.
    pub fn seeded(owner_id: &str, domain: &str, template: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            owner_id: owner_id.to_string(),
            domain: domain.to_string(),
            content: template.to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trips_through_strings() {
        for intent in [Intent::Save, Intent::Query, Intent::LogReading] {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
        assert!("remember".parse::<Intent>().is_err());
    }

    #[test]
    fn media_type_rejects_unknown_values() {
        assert_eq!("audio".parse::<MediaType>().unwrap(), MediaType::Audio);
        assert!("video".parse::<MediaType>().is_err());
    }

    #[test]
    fn new_entries_get_time_sortable_ids() {
        let verdict = Classification {
            intent: Intent::Save,
            content: "x".into(),
            is_original: true,
            source_url: None,
            source_title: None,
            source_author: None,
            media_type: MediaType::Text,
            tags: vec![],
        };
        let a = Entry::from_classification("casey", "life_log", "first".into(), &verdict);
        let b = Entry::from_classification("casey", "life_log", "second".into(), &verdict);
        assert!(a.id < b.id, "v7 ids must sort by creation order");
        assert!(a.last_accessed.is_none());
        assert!(!a.skip_backup);
    }

    #[test]
    fn seeded_dashboard_carries_template() {
        let dash = Dashboard::seeded("casey", "dream_journal", "# Dreams\n");
        assert_eq!(dash.content, "# Dreams\n");
        assert_eq!(dash.created_at, dash.updated_at);
    }
}

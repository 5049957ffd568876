//! Trove, a personal knowledge-capture pipeline.
//!
//! Raw thoughts come in at the top; an intent router decides whether they
//! are something to save, a question to answer, or a reading-progress note.
//! Saved entries are dual-written to a durable record store and a vector
//! index, recalled back out through recency-and-relevance fusion, and woven
//! into per-domain markdown dashboards by a synthesis oracle operating under
//! section-level merge rules. A change feed trails behind everything,
//! mirroring records into an archival store as rendered markdown.

pub mod backup;
pub mod config;
pub mod domains;
pub mod error;
pub mod ingest;
pub mod oracle;
pub mod recall;
pub mod router;
pub mod store;
pub mod synth;
pub mod types;

pub use error::{Result, TroveError};

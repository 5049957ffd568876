//! Asynchronous change-feed backup.
//!
//! The record store emits an ordered change feed; this module drains it in
//! batches and mirrors every record into the archival store as rendered
//! markdown. Archival writes are idempotent (content-addressed by stable
//! path, full overwrite), so replaying a batch after a partial failure is
//! always safe. The cursor itself lives in the archive next to the data it
//! describes.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::store::{ArchiveStore, ChangeRecord, RecordStore};
use crate::types::{Dashboard, Entry};

const CURSOR_PATH: &str = ".backup_cursor";

/// Outcome of one `run_once` drain.
#[derive(Debug, Default, Serialize)]
pub struct BackupReport {
    /// Feed events read this pass.
    pub scanned: usize,
    /// Records successfully mirrored.
    pub archived: usize,
    /// Records excluded by their own backup opt-out.
    pub skipped: usize,
    /// Records that failed to archive, logged and left behind.
    pub failed: usize,
    /// Feed position after this pass.
    pub cursor: i64,
}

pub struct BackupPropagator {
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn ArchiveStore>,
    batch_size: usize,
}

impl BackupPropagator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            archive,
            batch_size,
        }
    }

    /// Drain the feed until it is empty, one batch at a time.
    pub async fn run_to_end(&self) -> Result<BackupReport> {
        let mut total = BackupReport {
            cursor: self.load_cursor().await?,
            ..Default::default()
        };
        loop {
            let report = self.run_once().await?;
            let drained = report.scanned < self.batch_size;
            total.scanned += report.scanned;
            total.archived += report.archived;
            total.skipped += report.skipped;
            total.failed += report.failed;
            total.cursor = report.cursor;
            if drained {
                break;
            }
        }
        Ok(total)
    }

    /// Process at most one batch past the persisted cursor.
    ///
    /// The archive is a best-effort replica: a record that fails to archive
    /// is logged and left behind, and the cursor advances past it so one bad
    /// record can never stall the rest of the feed.
    pub async fn run_once(&self) -> Result<BackupReport> {
        let cursor = self.load_cursor().await?;
        let events = self.store.changes_since(cursor, self.batch_size).await?;

        let mut report = BackupReport {
            scanned: events.len(),
            cursor,
            ..Default::default()
        };

        let mut last_seq = cursor;

        for event in &events {
            last_seq = event.seq;
            match self.archive_record(&event.record).await {
                Ok(true) => report.archived += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(seq = event.seq, error = %e, "archival failed, skipping record");
                }
            }
        }

        report.cursor = last_seq;
        if report.cursor != cursor {
            self.save_cursor(report.cursor).await?;
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                archived = report.archived,
                skipped = report.skipped,
                failed = report.failed,
                cursor = report.cursor,
                "backup pass complete"
            );
        }
        Ok(report)
    }

    /// Returns `Ok(false)` when the record opted out of backup.
    async fn archive_record(&self, record: &ChangeRecord) -> Result<bool> {
        match record {
            ChangeRecord::Entry(entry) => {
                if entry.skip_backup {
                    return Ok(false);
                }
                let path = entry_path(entry);
                let body = render_entry(entry);
                self.archive.put_file(&path, &body, None).await?;
                Ok(true)
            }
            ChangeRecord::Dashboard(dashboard) => {
                let path = dashboard_path(dashboard);
                let body = render_dashboard(dashboard);
                self.archive.put_file(&path, &body, None).await?;
                Ok(true)
            }
        }
    }

    async fn load_cursor(&self) -> Result<i64> {
        match self.archive.get_file(CURSOR_PATH).await? {
            Some(file) => Ok(file.content.trim().parse().unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn save_cursor(&self, cursor: i64) -> Result<()> {
        self.archive
            .put_file(CURSOR_PATH, &cursor.to_string(), None)
            .await
    }
}

/// Date-partitioned layout keyed on creation time, stable across rewrites:
/// `entries/<domain>/<YYYY>/<MM>/<DD>/<id>.md`.
pub fn entry_path(entry: &Entry) -> String {
    let date = entry.created_at.get(..10).unwrap_or("0000-00-00");
    let mut parts = date.split('-');
    let year = parts.next().unwrap_or("0000");
    let month = parts.next().unwrap_or("00");
    let day = parts.next().unwrap_or("00");
    format!(
        "entries/{}/{}/{}/{}/{}.md",
        entry.domain, year, month, day, entry.id
    )
}

/// Dashboards overwrite in place, one file per owner and domain:
/// `dashboards/<owner>/<domain>.md`.
pub fn dashboard_path(dashboard: &Dashboard) -> String {
    format!("dashboards/{}/{}.md", dashboard.owner_id, dashboard.domain)
}

/// Markdown with a YAML frontmatter block, content verbatim below it.
pub fn render_entry(entry: &Entry) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("id: {}\n", entry.id));
    out.push_str(&format!("domain: {}\n", entry.domain));
    out.push_str(&format!("created_at: {}\n", entry.created_at));
    out.push_str(&format!("is_original: {}\n", entry.is_original));
    out.push_str(&format!("media_type: {}\n", entry.media_type.as_str()));
    if let Some(url) = &entry.source_url {
        out.push_str(&format!("source_url: {url}\n"));
    }
    if let Some(title) = &entry.source_title {
        out.push_str(&format!("source_title: {title}\n"));
    }
    if let Some(author) = &entry.source_author {
        out.push_str(&format!("source_author: {author}\n"));
    }
    if !entry.tags.is_empty() {
        out.push_str(&format!("tags: [{}]\n", entry.tags.join(", ")));
    }
    out.push_str("---\n\n");
    out.push_str(&entry.content);
    if !entry.content.ends_with('\n') {
        out.push('\n');
    }
    out
}

pub fn render_dashboard(dashboard: &Dashboard) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("owner: {}\n", dashboard.owner_id));
    out.push_str(&format!("domain: {}\n", dashboard.domain));
    out.push_str(&format!("updated_at: {}\n", dashboard.updated_at));
    out.push_str("---\n\n");
    out.push_str(&dashboard.content);
    if !dashboard.content.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, Intent, MediaType};

    fn sample_entry() -> Entry {
        let verdict = Classification {
            intent: Intent::Save,
            content: String::new(),
            is_original: true,
            source_url: None,
            source_title: None,
            source_author: None,
            media_type: MediaType::Text,
            tags: vec!["memory".into()],
        };
        let mut entry =
            Entry::from_classification("kyle", "life_log", "ran ten miles".into(), &verdict);
        entry.created_at = "2026-08-27T09:00:00+00:00".into();
        entry
    }

    #[test]
    fn entry_paths_partition_by_creation_date() {
        let entry = sample_entry();
        assert_eq!(
            entry_path(&entry),
            format!("entries/life_log/2026/08/27/{}.md", entry.id)
        );
    }

    #[test]
    fn entry_render_carries_frontmatter_and_verbatim_body() {
        let entry = sample_entry();
        let body = render_entry(&entry);
        assert!(body.starts_with("---\n"));
        assert!(body.contains(&format!("id: {}\n", entry.id)));
        assert!(body.contains("tags: [memory]\n"));
        assert!(body.ends_with("ran ten miles\n"));
    }

    #[test]
    fn dashboard_render_overwrites_single_path() {
        let dashboard = Dashboard::seeded("kyle", "life_log", "# Life\n");
        assert_eq!(dashboard_path(&dashboard), "dashboards/kyle/life_log.md");
        let body = render_dashboard(&dashboard);
        assert!(body.contains("owner: kyle\n"));
        assert!(body.contains("domain: life_log\n"));
        assert!(body.ends_with("# Life\n"));
    }

    #[test]
    fn dashboard_paths_are_owner_scoped() {
        let a = Dashboard::seeded("casey", "life_log", "# Life\n");
        let b = Dashboard::seeded("rowan", "life_log", "# Life\n");
        assert_ne!(dashboard_path(&a), dashboard_path(&b));
    }
}

//! Filesystem implementation of the [`ArchiveStore`].
//!
//! Files live under a root directory keyed by their logical path. The version
//! token is derived from the file's modification time; a `put_file` carrying
//! a stale token fails with a version conflict instead of clobbering a
//! concurrent write.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use crate::error::{Result, TroveError};
use crate::store::{ArchiveFile, ArchiveStore};

pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| TroveError::Archival {
            path: root.display().to_string(),
            reason: format!("failed to create archive root: {e}"),
        })?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        // Logical paths are always relative and must stay inside the root
        if path.starts_with('/') || path.split('/').any(|seg| seg == "..") {
            return Err(TroveError::Archival {
                path: path.to_string(),
                reason: "archive paths must be relative and contain no '..'".into(),
            });
        }
        Ok(self.root.join(path))
    }

    fn version_of(file: &Path) -> Result<Option<String>> {
        match std::fs::metadata(file) {
            Ok(meta) => {
                let modified = meta.modified().map_err(|e| TroveError::Archival {
                    path: file.display().to_string(),
                    reason: e.to_string(),
                })?;
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                Ok(Some(format!("{nanos}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TroveError::Archival {
                path: file.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn get_file(&self, path: &str) -> Result<Option<ArchiveFile>> {
        let file = self.resolve(path)?;
        let version = match Self::version_of(&file)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| TroveError::Archival {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(ArchiveFile { content, version }))
    }

    async fn put_file(
        &self,
        path: &str,
        content: &str,
        expected_version: Option<&str>,
    ) -> Result<()> {
        let file = self.resolve(path)?;

        if let Some(expected) = expected_version {
            let current = Self::version_of(&file)?;
            if current.as_deref() != Some(expected) {
                return Err(TroveError::VersionConflict {
                    path: path.to_string(),
                });
            }
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TroveError::Archival {
                    path: path.to_string(),
                    reason: format!("failed to create parent directory: {e}"),
                })?;
        }

        tokio::fs::write(&file, content)
            .await
            .map_err(|e| TroveError::Archival {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

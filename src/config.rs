use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TroveConfig {
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub oracle: OracleConfig,
    pub recall: RecallSettings,
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identity that scopes every store and index operation.
    pub owner_id: String,
    /// Domain used when `save` is called without one.
    pub default_domain: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub records_path: String,
    pub index_path: String,
    pub archive_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub api_key: String,
    pub generation_model: String,
    pub embedding_model: String,
    /// Bound on every oracle call. A timed-out synthesis fails the whole
    /// ingestion rather than persisting a partial dashboard.
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecallSettings {
    /// Nearest-neighbor count per namespace in relevance mode.
    pub top_k: usize,
    /// Cap on the fused cross-domain result list.
    pub fusion_cap: usize,
    /// Sliding window for recency mode.
    pub recency_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Change-feed events drained per propagator pass.
    pub batch_size: usize,
}

impl Default for TroveConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            oracle: OracleConfig::default(),
            recall: RecallSettings::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            owner_id: "default".into(),
            default_domain: "life_log".into(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_trove_dir();
        Self {
            records_path: dir.join("records.db").to_string_lossy().into_owned(),
            index_path: dir.join("index.db").to_string_lossy().into_owned(),
            archive_dir: dir.join("archive").to_string_lossy().into_owned(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            generation_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            timeout_secs: 60,
        }
    }
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            top_k: 8,
            fusion_cap: 15,
            recency_days: 14,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
        }
    }
}

/// Returns `~/.trove/`
pub fn default_trove_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".trove")
}

/// Returns the default config file path: `~/.trove/config.toml`
pub fn default_config_path() -> PathBuf {
    default_trove_dir().join("config.toml")
}

impl TroveConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TroveConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (TROVE_DB, TROVE_OWNER, TROVE_LOG_LEVEL, TROVE_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TROVE_DB") {
            self.storage.records_path = val;
        }
        if let Ok(val) = std::env::var("TROVE_OWNER") {
            self.pipeline.owner_id = val;
        }
        if let Ok(val) = std::env::var("TROVE_LOG_LEVEL") {
            self.pipeline.log_level = val;
        }
        if let Ok(val) = std::env::var("TROVE_API_KEY") {
            self.oracle.api_key = val;
        }
    }

    /// Resolve the records database path, expanding `~` if needed.
    pub fn resolved_records_path(&self) -> PathBuf {
        expand_tilde(&self.storage.records_path)
    }

    /// Resolve the vector index path, expanding `~` if needed.
    pub fn resolved_index_path(&self) -> PathBuf {
        expand_tilde(&self.storage.index_path)
    }

    /// Resolve the archive directory, expanding `~` if needed.
    pub fn resolved_archive_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.archive_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

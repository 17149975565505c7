use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub reconcile: ReconcileConfig,
    /// Maximum size of a single uploaded photo in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory holding collection documents and id counters
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// One JSON document per entity type, replaced by atomic rename
    File,
    /// One redb database per entity type
    Redb,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory of the photo asset store
    pub uploads_path: String,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub delete_orphan_blobs: bool,
    /// Blobs younger than this are never treated as orphans
    pub orphan_blob_grace_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            uploads_path: "./uploads".to_string(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            delete_orphan_blobs: false,
            orphan_blob_grace_seconds: 3600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StorageBackend::File,
            "redb" => StorageBackend::Redb,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown STORAGE_BACKEND '{other}', expected 'file' or 'redb'"
                )))
            }
        };

        let uploads_path =
            std::env::var("UPLOADS_PATH").unwrap_or_else(|_| "./uploads".to_string());

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024); // 10MB

        let delete_orphan_blobs = std::env::var("RECONCILE_DELETE_ORPHAN_BLOBS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let orphan_blob_grace_seconds = std::env::var("ORPHAN_BLOB_GRACE_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        let config = Config {
            node: NodeConfig { data_dir },
            storage: StorageConfig {
                backend,
                uploads_path,
            },
            reconcile: ReconcileConfig {
                delete_orphan_blobs,
                orphan_blob_grace_seconds,
            },
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR cannot be empty".to_string(),
            ));
        }

        if self.storage.uploads_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "UPLOADS_PATH cannot be empty".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than zero".to_string(),
            ));
        }

        if self.reconcile.delete_orphan_blobs && self.reconcile.orphan_blob_grace_seconds == 0 {
            tracing::warn!(
                "Orphan blob deletion is enabled with no grace period. \
                 Uploads still in flight may be removed."
            );
        }

        Ok(())
    }
}

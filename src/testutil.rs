//! Shared test helpers for sgii-store unit tests.

use std::sync::Arc;

use crate::config::{Config, NodeConfig, ReconcileConfig, StorageBackend, StorageConfig};
use crate::AppState;

/// Test configuration over a temporary directory.
pub fn test_config(temp_dir: &tempfile::TempDir, backend: StorageBackend) -> Config {
    let data_dir = temp_dir.path().join("data");
    let uploads_dir = temp_dir.path().join("uploads");

    Config {
        node: NodeConfig {
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            backend,
            uploads_path: uploads_dir.to_string_lossy().to_string(),
        },
        reconcile: ReconcileConfig {
            delete_orphan_blobs: false,
            orphan_blob_grace_seconds: 0,
        },
        max_upload_size: 1024 * 1024, // 1MB for tests
    }
}

/// Create a test AppState backed by flat files in a temporary directory.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let config = test_config(temp_dir, StorageBackend::File);
    Arc::new(AppState::open(config).expect("Failed to open test state"))
}

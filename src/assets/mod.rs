mod local;

pub use local::LocalAssetStore;

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::storage::{StorageError, StoreError};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Asset not found: {0}")]
    NotFound(String),
    #[error("Invalid asset name: {0}")]
    InvalidName(String),
    #[error("Upload rejected: {0}")]
    Rejected(String),
}

impl From<AssetError> for StoreError {
    fn from(e: AssetError) -> Self {
        match e {
            AssetError::Io(e) => StoreError::StorageUnavailable(StorageError::Io(e)),
            AssetError::NotFound(name) => {
                StoreError::validation(format!("photo file {name} not found"))
            }
            AssetError::InvalidName(name) => {
                StoreError::validation(format!("invalid photo file name {name}"))
            }
            AssetError::Rejected(reason) => StoreError::Validation(reason),
        }
    }
}

/// What the store kept for one upload; enough to build a `Photo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub stored_filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub byte_size: u64,
}

/// A stored blob as seen when listing the store.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub stored_filename: String,
    pub modified: SystemTime,
}

/// Storage for uploaded photo bytes, keyed by generated filenames.
/// Blobs carry no meaning without the `Photo` entity that names them.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Write `data` under a fresh collision-resistant name.
    async fn store(&self, original_filename: &str, data: Bytes) -> Result<StoredAsset, AssetError>;

    /// Map a stored filename to its path under the store root.
    ///
    /// Returns `None` for anything that could escape the root. The file is
    /// not required to exist.
    fn resolve(&self, stored_filename: &str) -> Option<PathBuf>;

    async fn get(&self, stored_filename: &str) -> Result<Bytes, AssetError>;
    async fn delete(&self, stored_filename: &str) -> Result<(), AssetError>;
    async fn exists(&self, stored_filename: &str) -> Result<bool, AssetError>;
    async fn list(&self) -> Result<Vec<AssetEntry>, AssetError>;
}

/// Extension to keep on the stored name: lowercase ASCII alphanumerics from
/// the original name's last extension, at most 10 characters.
pub fn sanitized_extension(original_filename: &str) -> Option<String> {
    let name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if ext.is_empty() || ext.len() > 10 {
        return None;
    }
    Some(ext)
}

/// Content type guessed from the original filename.
pub fn content_type_for(original_filename: &str) -> String {
    mime_guess::from_path(original_filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

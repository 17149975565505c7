use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::{content_type_for, sanitized_extension, AssetEntry, AssetError, AssetStore, StoredAsset};

/// Local filesystem asset store rooted at one upload directory.
pub struct LocalAssetStore {
    base_path: PathBuf,
}

impl LocalAssetStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checked_path(&self, stored_filename: &str) -> Result<PathBuf, AssetError> {
        self.resolve(stored_filename)
            .ok_or_else(|| AssetError::InvalidName(stored_filename.to_string()))
    }
}

/// Write `data` to `path`, which must not exist yet.
///
/// The bytes go to a temporary sibling first; on any failure it is removed
/// and `path` is left untouched.
fn write_new(dir: &Path, path: &Path, data: &[u8]) -> Result<(), AssetError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// A stored filename must be a single plain path component.
fn is_plain_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') {
        return false;
    }
    if name.contains(['/', '\\', ':', '\0']) || name.contains("..") {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn store(&self, original_filename: &str, data: Bytes) -> Result<StoredAsset, AssetError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stored_filename = match sanitized_extension(original_filename) {
            Some(ext) => format!("{id}.{ext}"),
            None => id,
        };
        let path = self.base_path.join(&stored_filename);

        let dir = self.base_path.clone();
        let blob = data.clone();
        tokio::task::spawn_blocking(move || write_new(&dir, &path, &blob))
            .await
            .map_err(|e| AssetError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        tracing::debug!(
            stored_filename = %stored_filename,
            byte_size = data.len(),
            "stored asset"
        );

        Ok(StoredAsset {
            stored_filename,
            original_filename: original_filename.to_string(),
            content_type: content_type_for(original_filename),
            byte_size: data.len() as u64,
        })
    }

    fn resolve(&self, stored_filename: &str) -> Option<PathBuf> {
        if !is_plain_name(stored_filename) {
            tracing::warn!(stored_filename = %stored_filename, "rejected asset name");
            return None;
        }
        Some(self.base_path.join(stored_filename))
    }

    async fn get(&self, stored_filename: &str) -> Result<Bytes, AssetError> {
        let path = self.checked_path(stored_filename)?;
        if !path.exists() {
            return Err(AssetError::NotFound(stored_filename.to_string()));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, stored_filename: &str) -> Result<(), AssetError> {
        let path = self.checked_path(stored_filename)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, stored_filename: &str) -> Result<bool, AssetError> {
        let path = self.checked_path(stored_filename)?;
        Ok(path.exists())
    }

    async fn list(&self) -> Result<Vec<AssetEntry>, AssetError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_plain_name(&name) {
                continue;
            }
            entries.push(AssetEntry {
                stored_filename: name,
                modified: metadata.modified()?,
            });
        }
        entries.sort_by(|a, b| a.stored_filename.cmp(&b.stored_filename));
        Ok(entries)
    }
}

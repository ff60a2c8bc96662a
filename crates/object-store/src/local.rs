//! Local filesystem object store implementation

use crate::ObjectStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Object store rooted at a local directory
///
/// Keys map to relative paths under the root. Writes go to a temporary
/// sibling file that is synced and then renamed over the target, so a
/// reader never observes a partially written object.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

/// Flush a directory so a rename inside it survives power loss
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = tokio::fs::File::open(dir)
        .await
        .with_context(|| format!("Failed to open directory: {}", dir.display()))?;
    handle
        .sync_all()
        .await
        .with_context(|| format!("Failed to sync directory: {}", dir.display()))
}

// No directory handles to sync outside unix
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path(key);
        let parent = path
            .parent()
            .with_context(|| format!("Object path has no parent: {}", path.display()))?;

        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let file_name = path
            .file_name()
            .with_context(|| format!("Object path has no file name: {}", path.display()))?;
        let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create file: {}", tmp_path.display()))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &body)
            .await
            .with_context(|| format!("Failed to write file: {}", tmp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync file: {}", tmp_path.display()))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to move file into place: {}", path.display()))?;
        sync_dir(parent).await?;

        tracing::debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read file: {}", path.display()))
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check file: {}", path.display()))
    }

    fn display_name(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }
}

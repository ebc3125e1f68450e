use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::object_store::{ObjectInfo, ObjectStore};

/// ObjectStore implementation backed by a local directory.
/// Each bucket is a subdirectory of `root`; keys map to relative paths.
#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket: bucket.into(),
        }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            anyhow::bail!("Invalid object key: {}", key);
        }
        Ok(self.bucket_dir().join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        Ok(tokio::fs::metadata(self.bucket_dir())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn create_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.bucket_dir())
            .await
            .context("Failed to create bucket directory")
    }

    async fn list_objects(&self) -> Result<Vec<ObjectInfo>> {
        let bucket_dir = self.bucket_dir();
        tokio::task::spawn_blocking(move || -> Result<Vec<ObjectInfo>> {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&bucket_dir).sort_by_file_name() {
                let entry = entry.context("Failed to walk bucket directory")?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&bucket_dir)?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                objects.push(ObjectInfo {
                    key,
                    size: entry.metadata()?.len(),
                });
            }
            Ok(objects)
        })
        .await?
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<()> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("Failed to copy {} into bucket", path.display()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object {}", key))
    }
}

//! Copy downloaded expression matrices into the object store

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::io::{ObjectStore, ensure_bucket};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    suffix: String,
    dry_run: bool,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, suffix: impl Into<String>, dry_run: bool) -> Self {
        Self {
            store,
            suffix: suffix.into(),
            dry_run,
        }
    }

    /// Upload every file under `dir` whose name ends with the suffix.
    /// Keys are bare file names; keys already in the bucket are skipped.
    pub async fn run(&self, dir: &Path) -> Result<UploadResult> {
        let bucket = self.store.bucket().to_string();

        if self.dry_run {
            if !self.store.bucket_exists().await? {
                info!("Bucket '{}' does not exist and would be created", bucket);
            }
        } else if ensure_bucket(self.store.as_ref()).await? {
            info!("Bucket '{}' created", bucket);
        } else {
            info!("Bucket '{}' already exists", bucket);
        }

        let mut existing: HashSet<String> = if self.store.bucket_exists().await? {
            self.store
                .list_objects()
                .await?
                .into_iter()
                .map(|object| object.key)
                .collect()
        } else {
            HashSet::new()
        };

        let candidates = find_matching_files(dir, &self.suffix).await?;
        info!(
            "Found {} files ending with '{}' under {}",
            candidates.len(),
            self.suffix,
            dir.display()
        );

        let mut result = UploadResult::default();
        for path in candidates {
            let Some(key) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            if existing.contains(&key) {
                info!("'{}' already exists in bucket '{}', skipping", key, bucket);
                result.skipped += 1;
                continue;
            }

            if self.dry_run {
                info!("Would upload {} as '{}'", path.display(), key);
                existing.insert(key);
                result.uploaded += 1;
                continue;
            }

            match self.store.put_object(&key, &path).await {
                Ok(()) => {
                    info!("Uploaded '{}' to bucket '{}'", key, bucket);
                    existing.insert(key);
                    result.uploaded += 1;
                }
                Err(e) => {
                    error!("Failed to upload {}: {:#}", path.display(), e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}

/// Regular files below `dir` whose name ends with `suffix`, in path order
async fn find_matching_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    let suffix = suffix.to_string();

    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(&suffix)
            {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    })
    .await?
}

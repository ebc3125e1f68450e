use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// An object listed in a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Abstraction over a single bucket of an object store
/// This trait lets the uploader and loader work against S3/MinIO or a
/// local directory with the same code
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store targets
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> Result<bool>;

    async fn create_bucket(&self) -> Result<()>;

    /// List every object in the bucket
    async fn list_objects(&self) -> Result<Vec<ObjectInfo>>;

    /// Upload a local file under `key`
    async fn put_object(&self, key: &str, path: &Path) -> Result<()>;

    /// Read a whole object into memory
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}

/// Create the bucket if it is missing. Returns true when it was created.
pub async fn ensure_bucket(store: &dyn ObjectStore) -> Result<bool> {
    if store.bucket_exists().await? {
        return Ok(false);
    }
    store.create_bucket().await?;
    Ok(true)
}

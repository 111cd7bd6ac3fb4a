use futures::future::BoxFuture;

use crate::error::CacheError;
use crate::models::{RequestKey, StoredResponse};

use super::CachedData;

pub type StorageResult<T> = Result<T, CacheError>;

/// A store of named cache buckets.
///
/// Individual operations are atomic per key; `put` is last-write-wins, so
/// concurrent writers to the same key never leave a torn entry.
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist yet.
    fn open<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<()>>;

    fn has<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>>;

    /// Bucket names in creation order.
    fn keys(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Returns whether a bucket was removed.
    fn delete<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>>;

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, StorageResult<Option<CachedData<StoredResponse>>>>;

    /// Store one entry, creating the bucket if needed.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: RequestKey,
        response: StoredResponse,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Store a batch of entries in one step: either all land or none do.
    fn put_all<'a>(
        &'a self,
        bucket: &'a str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> BoxFuture<'a, StorageResult<()>>;

    fn entries<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<(RequestKey, CachedData<StoredResponse>)>>>;
}

/// Look a key up across every bucket, oldest bucket first.
pub async fn match_any(
    storage: &dyn CacheStorage,
    key: &RequestKey,
) -> StorageResult<Option<CachedData<StoredResponse>>> {
    for bucket in storage.keys().await? {
        if let Some(hit) = storage.get(&bucket, key).await? {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}

/// Bucket names double as file stems, so keep them to a safe alphabet.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidBucketName(name.to_string()))
    }
}

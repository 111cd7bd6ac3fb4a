use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::RwLock;

use crate::models::{RequestKey, StoredResponse};

use super::{validate_bucket_name, CacheStorage, CachedData, StorageResult};

struct Bucket {
    name: String,
    entries: HashMap<RequestKey, CachedData<StoredResponse>>,
}

/// Process-local bucket store.
#[derive(Default)]
pub struct MemoryStorage {
    // Vec keeps creation order for `keys`
    buckets: RwLock<Vec<Bucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut<'b>(buckets: &'b mut Vec<Bucket>, name: &str) -> &'b mut Bucket {
        let index = match buckets.iter().position(|b| b.name == name) {
            Some(index) => index,
            None => {
                buckets.push(Bucket {
                    name: name.to_string(),
                    entries: HashMap::new(),
                });
                buckets.len() - 1
            }
        };
        &mut buckets[index]
    }
}

impl CacheStorage for MemoryStorage {
    fn open<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            validate_bucket_name(bucket)?;
            let mut buckets = self.buckets.write().await;
            Self::bucket_mut(&mut buckets, bucket);
            Ok(())
        }
        .boxed()
    }

    fn has<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        async move {
            let buckets = self.buckets.read().await;
            Ok(buckets.iter().any(|b| b.name == bucket))
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        async move {
            let buckets = self.buckets.read().await;
            Ok(buckets.iter().map(|b| b.name.clone()).collect())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        async move {
            let mut buckets = self.buckets.write().await;
            let before = buckets.len();
            buckets.retain(|b| b.name != bucket);
            Ok(buckets.len() != before)
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, StorageResult<Option<CachedData<StoredResponse>>>> {
        async move {
            let buckets = self.buckets.read().await;
            Ok(buckets
                .iter()
                .find(|b| b.name == bucket)
                .and_then(|b| b.entries.get(key))
                .cloned())
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: RequestKey,
        response: StoredResponse,
    ) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            validate_bucket_name(bucket)?;
            let mut buckets = self.buckets.write().await;
            Self::bucket_mut(&mut buckets, bucket)
                .entries
                .insert(key, CachedData::new(response));
            Ok(())
        }
        .boxed()
    }

    fn put_all<'a>(
        &'a self,
        bucket: &'a str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            validate_bucket_name(bucket)?;
            // One write lock for the whole batch
            let mut buckets = self.buckets.write().await;
            let target = Self::bucket_mut(&mut buckets, bucket);
            for (key, response) in entries {
                target.entries.insert(key, CachedData::new(response));
            }
            Ok(())
        }
        .boxed()
    }

    fn entries<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<(RequestKey, CachedData<StoredResponse>)>>> {
        async move {
            let buckets = self.buckets.read().await;
            let mut entries: Vec<_> = buckets
                .iter()
                .find(|b| b.name == bucket)
                .map(|b| {
                    b.entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        }
        .boxed()
    }
}

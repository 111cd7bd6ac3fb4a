use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::models::{RequestKey, StoredResponse};

use super::{validate_bucket_name, CacheStorage, CachedData, StorageResult};

/// Bucket file extension; temp files end in `.json.tmp` and are skipped.
const BUCKET_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct BucketFile {
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    entries: BTreeMap<RequestKey, CachedData<StoredResponse>>,
}

impl BucketFile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

/// Just enough of a bucket file to order buckets without keeping bodies.
#[derive(Debug, Clone, Deserialize)]
struct BucketHeader {
    name: String,
    created_at: DateTime<Utc>,
}

/// Bucket store backed by one JSON file per bucket.
///
/// Files are replaced atomically (write to a temp file, then rename), so a
/// reader never sees a half-written bucket. Writers are serialised by a
/// single lock because each put is a read-modify-write of the whole file.
///
/// Bucket names are indexed in memory: the directory is scanned once, on the
/// first `keys()`, and every later save or delete updates the index. Buckets
/// created by another process after that scan are not seen.
pub struct DiskStorage {
    cache_dir: PathBuf,
    write_lock: Mutex<()>,
    index: RwLock<Option<Vec<BucketHeader>>>,
}

impl DiskStorage {
    pub fn new(cache_dir: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            write_lock: Mutex::new(()),
            index: RwLock::new(None),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", name, BUCKET_EXTENSION))
    }

    async fn load(&self, name: &str) -> StorageResult<Option<BucketFile>> {
        validate_bucket_name(name)?;
        let path = self.bucket_path(name);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    async fn load_or_create(&self, name: &str) -> StorageResult<BucketFile> {
        Ok(self
            .load(name)
            .await?
            .unwrap_or_else(|| BucketFile::new(name)))
    }

    async fn save(&self, bucket: &BucketFile) -> StorageResult<()> {
        let path = self.bucket_path(&bucket.name);
        let tmp = path.with_extension(format!("{}.tmp", BUCKET_EXTENSION));
        let contents = serde_json::to_vec(bucket)?;
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        debug!(cache = %bucket.name, entries = bucket.entries.len(), "Saved cache bucket");

        if let Some(index) = self.index.write().await.as_mut() {
            if !index.iter().any(|h| h.name == bucket.name) {
                index.push(BucketHeader {
                    name: bucket.name.clone(),
                    created_at: bucket.created_at,
                });
                sort_headers(index);
            }
        }
        Ok(())
    }

    /// Read every bucket file once to build the index.
    async fn scan(&self) -> StorageResult<Vec<BucketHeader>> {
        let mut headers = Vec::new();
        let mut dir = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXTENSION) {
                continue;
            }
            let parsed = fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_slice::<BucketHeader>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(header) => headers.push(header),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache bucket");
                }
            }
        }
        sort_headers(&mut headers);
        debug!(buckets = headers.len(), "Indexed cache buckets");
        Ok(headers)
    }
}

fn sort_headers(headers: &mut [BucketHeader]) {
    headers.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}

impl CacheStorage for DiskStorage {
    fn open<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            let _guard = self.write_lock.lock().await;
            if self.load(bucket).await?.is_none() {
                self.save(&BucketFile::new(bucket)).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn has<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        async move {
            validate_bucket_name(bucket)?;
            Ok(fs::try_exists(self.bucket_path(bucket)).await?)
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        async move {
            if let Some(index) = self.index.read().await.as_ref() {
                return Ok(index.iter().map(|h| h.name.clone()).collect());
            }

            let _guard = self.write_lock.lock().await;
            let mut index = self.index.write().await;
            let headers = match index.as_ref() {
                Some(headers) => headers.clone(),
                None => {
                    let headers = self.scan().await?;
                    *index = Some(headers.clone());
                    headers
                }
            };
            Ok(headers.into_iter().map(|h| h.name).collect())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        async move {
            validate_bucket_name(bucket)?;
            let _guard = self.write_lock.lock().await;
            let removed = match fs::remove_file(self.bucket_path(bucket)).await {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            if let Some(index) = self.index.write().await.as_mut() {
                index.retain(|h| h.name != bucket);
            }
            Ok(removed)
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, StorageResult<Option<CachedData<StoredResponse>>>> {
        async move {
            Ok(self
                .load(bucket)
                .await?
                .and_then(|mut file| file.entries.remove(key)))
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
            let _guard = self.write_lock.lock().await;
            let mut file = self.load_or_create(bucket).await?;
            file.entries.insert(key, CachedData::new(response));
            self.save(&file).await
        }
        .boxed()
    }

    fn put_all<'a>(
        &'a self,
        bucket: &'a str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            let _guard = self.write_lock.lock().await;
            let mut file = self.load_or_create(bucket).await?;
            for (key, response) in entries {
                file.entries.insert(key, CachedData::new(response));
            }
            self.save(&file).await
        }
        .boxed()
    }

    fn entries<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<(RequestKey, CachedData<StoredResponse>)>>> {
        async move {
            Ok(self
                .load(bucket)
                .await?
                .map(|file| file.entries.into_iter().collect())
                .unwrap_or_default())
        }
        .boxed()
    }
}

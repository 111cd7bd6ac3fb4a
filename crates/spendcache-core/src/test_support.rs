//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Url;

use crate::cache::{CacheStorage, CachedData, MemoryStorage, StorageResult};
use crate::config::{Config, DEFAULT_OFFLINE_PAGE};
use crate::error::{CacheError, FetchError};
use crate::models::{Request, RequestKey, StoredResponse};
use crate::network::Fetcher;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN)
        .and_then(|base| base.join(path))
        .expect("test URL")
}

/// Fetcher answering from a fixed table. Unknown URLs get a 404, URLs
/// marked with `fail` and every URL while offline get a transport error.
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, StoredResponse>>,
    failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    online: AtomicBool,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Serves every default static asset; the offline page body is "offline page".
    pub fn with_shell() -> Self {
        let fetcher = Self::new();
        for asset in Config::default().static_assets {
            let body = if asset == DEFAULT_OFFLINE_PAGE {
                "offline page".to_string()
            } else {
                format!("asset {}", asset)
            };
            fetcher.serve(url(&asset).as_str(), 200, &body);
        }
        fetcher
    }

    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), StoredResponse::new(url, status, body));
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().push(url.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn answer(&self, request: &Request) -> Result<StoredResponse, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
            return Err(FetchError::Unreachable(url));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| StoredResponse::new(url, 404, "Not Found")))
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<StoredResponse, FetchError>> {
        let result = self.answer(request);
        async move { result }.boxed()
    }
}

/// Storage whose every operation fails.
pub struct BrokenStorage;

fn broken<T: Send + 'static>() -> BoxFuture<'static, StorageResult<T>> {
    async { Err(CacheError::Storage("disk unavailable".to_string())) }.boxed()
}

impl CacheStorage for BrokenStorage {
    fn open<'a>(&'a self, _bucket: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        broken()
    }

    fn has<'a>(&'a self, _bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        broken()
    }

    fn keys(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        broken()
    }

    fn delete<'a>(&'a self, _bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        broken()
    }

    fn get<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a RequestKey,
    ) -> BoxFuture<'a, StorageResult<Option<CachedData<StoredResponse>>>> {
        broken()
    }

    fn put<'a>(
        &'a self,
        _bucket: &'a str,
        _key: RequestKey,
        _response: StoredResponse,
    ) -> BoxFuture<'a, StorageResult<()>> {
        broken()
    }

    fn put_all<'a>(
        &'a self,
        _bucket: &'a str,
        _entries: Vec<(RequestKey, StoredResponse)>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        broken()
    }

    fn entries<'a>(
        &'a self,
        _bucket: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<(RequestKey, CachedData<StoredResponse>)>>> {
        broken()
    }
}

/// In-memory storage with targeted faults: deleting one of the `undeletable`
/// buckets fails, and listing fails while `keys_fail` is set.
pub struct FaultyStorage {
    inner: MemoryStorage,
    undeletable: Mutex<Vec<String>>,
    keys_fail: AtomicBool,
}

impl FaultyStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            undeletable: Mutex::new(Vec::new()),
            keys_fail: AtomicBool::new(false),
        }
    }

    pub fn refuse_delete(&self, bucket: &str) {
        self.undeletable.lock().unwrap().push(bucket.to_string());
    }

    pub fn fail_keys(&self, fail: bool) {
        self.keys_fail.store(fail, Ordering::SeqCst);
    }
}

impl CacheStorage for FaultyStorage {
    fn open<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.open(bucket)
    }

    fn has<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        self.inner.has(bucket)
    }

    fn keys(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        if self.keys_fail.load(Ordering::SeqCst) {
            return broken();
        }
        self.inner.keys()
    }

    fn delete<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        if self.undeletable.lock().unwrap().iter().any(|b| b == bucket) {
            return broken();
        }
        self.inner.delete(bucket)
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, StorageResult<Option<CachedData<StoredResponse>>>> {
        self.inner.get(bucket, key)
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: RequestKey,
        response: StoredResponse,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.put(bucket, key, response)
    }

    fn put_all<'a>(
        &'a self,
        bucket: &'a str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.put_all(bucket, entries)
    }

    fn entries<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<(RequestKey, CachedData<StoredResponse>)>>> {
        self.inner.entries(bucket)
    }
}

//! The offline cache manager.
//!
//! One manager owns one versioned bucket. It goes through the worker
//! lifecycle (install → activate), then routes every GET it is handed
//! through cache-first, stale-while-revalidate or network-first depending
//! on how the request classifies. Nothing in the fetch path returns an
//! error: network and storage failures degrade to a cached copy, the
//! offline page, or `FetchOutcome::Unavailable`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use reqwest::{Method, Url};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{match_any, CacheStorage};
use crate::config::Config;
use crate::error::{truncate_body, CacheError};
use crate::lifecycle::{Clients, WorkerState};
use crate::models::{FetchOutcome, Notification, Request, RequestKey, ResponseSource, StoredResponse};
use crate::network::Fetcher;
use crate::routing::{classify, RequestClass};

/// Control message that asks a waiting manager to activate immediately.
pub const SKIP_WAITING_MESSAGE: &str = "skipWaiting";

/// Background sync tag reserved for pushing expenses to a server.
pub const SYNC_EXPENSES_TAG: &str = "sync-expenses";

/// What activation cleaned up and took over.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    /// Stale buckets whose deletion failed; they are retried on the next activation.
    pub failed: Vec<String>,
    pub claimed: usize,
}

pub struct OfflineCacheManager {
    config: Arc<Config>,
    cache_name: String,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<Clients>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineCacheManager {
    pub fn new(
        config: Config,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<Clients>,
    ) -> Result<Self, CacheError> {
        config
            .validate()
            .map_err(|e| CacheError::InvalidConfig(format!("{:#}", e)))?;
        let origin = config
            .origin_url()
            .map_err(|e| CacheError::InvalidConfig(format!("{:#}", e)))?;

        Ok(Self {
            cache_name: config.cache_name(),
            config: Arc::new(config),
            origin,
            storage,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Ask to replace the running version without waiting for its pages to close.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            info!(cache = %self.cache_name, "Skip waiting");
        }
    }

    pub async fn mark_redundant(&self) {
        *self.state.write().await = WorkerState::Redundant;
        debug!(cache = %self.cache_name, "Marked redundant");
    }

    /// Move from one of `from` to `to`, or report the state that blocked it.
    async fn transition(
        &self,
        from: &[WorkerState],
        to: WorkerState,
        operation: &'static str,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if !from.contains(&*state) {
            return Err(CacheError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn asset_url(&self, path: &str) -> Result<Url, CacheError> {
        self.origin
            .join(path)
            .map_err(|e| CacheError::InvalidConfig(format!("Bad asset path {}: {}", path, e)))
    }

    // ===== Install =====

    /// Fetch and store every static asset. All-or-nothing: a single
    /// unreachable asset rejects the install and nothing is written.
    pub async fn install(&self) -> Result<usize, CacheError> {
        self.transition(&[WorkerState::Parsed], WorkerState::Installing, "install")
            .await?;
        info!(cache = %self.cache_name, "Installing");

        match self.precache().await {
            Ok(count) => {
                *self.state.write().await = WorkerState::Installed;
                info!(cache = %self.cache_name, assets = count, "Cached static assets");
                if self.config.skip_waiting {
                    self.skip_waiting();
                }
                Ok(count)
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "Cache failed");
                *self.state.write().await = WorkerState::Redundant;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, CacheError> {
        let requests = self
            .config
            .static_assets
            .iter()
            .map(|path| self.asset_url(path).map(Request::get))
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

        let mut entries = Vec::with_capacity(requests.len());
        for (request, result) in requests.iter().zip(results) {
            let response = result.map_err(|e| CacheError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.is_success() {
                return Err(CacheError::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("HTTP {}: {}", response.status, truncate_body(&response.text())),
                });
            }
            entries.push((request.key(), response));
        }

        let count = entries.len();
        self.storage.put_all(&self.cache_name, entries).await?;
        Ok(count)
    }

    // ===== Activate =====

    /// Delete every bucket but the current one, then claim all open clients.
    pub async fn activate(&self) -> Result<ActivationReport, CacheError> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating, "activate")
            .await?;
        info!(cache = %self.cache_name, "Activating");

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list caches, skipping cleanup");
                Vec::new()
            }
        };

        let deletions = names
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .map(|name| async move {
                info!(cache = %name, "Deleting old cache");
                let result = self.storage.delete(&name).await;
                (name, result)
            });

        let mut report = ActivationReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete old cache");
                    report.failed.push(name);
                }
            }
        }

        info!(cache = %self.cache_name, "Claiming clients");
        report.claimed = self.clients.claim(&self.cache_name).await;
        *self.state.write().await = WorkerState::Activated;
        Ok(report)
    }

    /// Re-attach to a bucket installed by an earlier run. Returns false when
    /// there is nothing to restore and a fresh install is needed.
    pub async fn restore(&self) -> Result<bool, CacheError> {
        let state = self.state().await;
        if state != WorkerState::Parsed {
            return Err(CacheError::InvalidState {
                operation: "restore",
                state,
            });
        }
        if !self.storage.has(&self.cache_name).await? {
            return Ok(false);
        }
        *self.state.write().await = WorkerState::Activated;
        debug!(cache = %self.cache_name, "Restored active cache");
        Ok(true)
    }

    // ===== Fetch routing =====

    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        if request.method != Method::GET {
            return FetchOutcome::Passthrough;
        }
        if self.state().await != WorkerState::Activated {
            debug!(url = %request.url, "Not active, request not intercepted");
            return FetchOutcome::Passthrough;
        }

        match classify(&self.config, &request.url) {
            RequestClass::ThirdParty => self.cache_first(request).await,
            RequestClass::OriginStatic => self.stale_while_revalidate(request).await,
            RequestClass::Other => self.network_first(request).await,
        }
    }

    async fn cache_first(&self, request: Request) -> FetchOutcome {
        let key = request.key();
        if let Some(cached) = self.lookup(&key).await {
            return FetchOutcome::served(cached, ResponseSource::Cache);
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.store(key, response.clone()).await;
                FetchOutcome::served(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Third-party fetch failed");
                if request.is_navigation() {
                    self.offline_fallback().await
                } else {
                    FetchOutcome::Unavailable
                }
            }
        }
    }

    async fn stale_while_revalidate(&self, request: Request) -> FetchOutcome {
        let key = request.key();
        if let Some(cached) = self.lookup(&key).await {
            self.spawn_revalidation(request).await;
            return FetchOutcome::served(cached, ResponseSource::Cache);
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.store(key, response.clone()).await;
                FetchOutcome::served(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Static asset fetch failed");
                if request.is_navigation() || request.expects_document() {
                    self.offline_fallback().await
                } else {
                    FetchOutcome::Unavailable
                }
            }
        }
    }

    async fn network_first(&self, request: Request) -> FetchOutcome {
        let key = request.key();
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.store(key, response.clone()).await;
                FetchOutcome::served(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup(&key).await {
                    Some(cached) => FetchOutcome::served(cached, ResponseSource::Cache),
                    None => FetchOutcome::Unavailable,
                }
            }
        }
    }

    /// Refresh an entry after serving it from cache. The result only
    /// affects the next request; failures are dropped. A refresh that lands
    /// after its bucket was deleted is discarded rather than recreating it.
    async fn spawn_revalidation(&self, request: Request) {
        let fetcher = Arc::clone(&self.fetcher);
        let storage = Arc::clone(&self.storage);
        let cache_name = self.cache_name.clone();

        let handle = tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) => {
                    if !matches!(storage.has(&cache_name).await, Ok(true)) {
                        debug!(url = %request.url, cache = %cache_name, "Cache gone, dropping refreshed asset");
                        return;
                    }
                    if let Err(e) = storage.put(&cache_name, request.key(), response).await {
                        debug!(url = %request.url, error = %e, "Failed to store refreshed asset");
                    } else {
                        debug!(url = %request.url, "Refreshed cached asset");
                    }
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Background refresh failed, keeping cached copy");
                }
            }
        });

        let mut background = self.background.lock().await;
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Wait for every background refresh spawned so far.
    pub async fn wait_until_idle(&self) {
        let handles = std::mem::take(&mut *self.background.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background refresh task failed");
            }
        }
    }

    /// Storage errors read as a miss.
    async fn lookup(&self, key: &RequestKey) -> Option<StoredResponse> {
        match match_any(self.storage.as_ref(), key).await {
            Ok(hit) => hit.map(|cached| cached.data),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: RequestKey, response: StoredResponse) {
        if let Err(e) = self.storage.put(&self.cache_name, key.clone(), response).await {
            warn!(key = %key, error = %e, "Failed to cache response");
        }
    }

    async fn offline_fallback(&self) -> FetchOutcome {
        let url = match self.asset_url(&self.config.offline_page) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Offline page path is invalid");
                return FetchOutcome::Unavailable;
            }
        };
        match self.lookup(&RequestKey::new(&Method::GET, &url)).await {
            Some(page) => FetchOutcome::served(page, ResponseSource::OfflineFallback),
            None => {
                warn!(url = %url, "Offline page is not cached");
                FetchOutcome::Unavailable
            }
        }
    }

    // ===== Auxiliary signals =====

    /// Returns whether the message was recognised.
    pub fn handle_message(&self, message: &str) -> bool {
        if message == SKIP_WAITING_MESSAGE {
            self.skip_waiting();
            true
        } else {
            debug!(message = message, "Ignoring unknown message");
            false
        }
    }

    /// Reserved hook for syncing expenses to a server; currently only logs.
    pub fn handle_sync(&self, tag: &str) -> bool {
        if tag == SYNC_EXPENSES_TAG {
            info!(tag = tag, "Background sync triggered");
            true
        } else {
            debug!(tag = tag, "Ignoring unknown sync tag");
            false
        }
    }

    pub fn handle_push(&self, payload: Option<&str>) -> Notification {
        let notification = Notification::from_push(payload);
        info!(tag = %notification.tag, body = %notification.body, "Showing notification");
        notification
    }
}

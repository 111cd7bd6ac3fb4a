//! Worker lifecycle and version handoff.
//!
//! A `Registration` keeps at most one active and one waiting manager. A new
//! version is installed into the waiting slot and promoted when nothing
//! holds it back: no active version yet, skip-waiting was requested, or
//! no open page is still controlled by the active version.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CacheError;
use crate::manager::{ActivationReport, OfflineCacheManager};
use crate::models::{FetchOutcome, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(label)
    }
}

/// Open pages and the cache version controlling each of them.
#[derive(Debug, Default)]
pub struct Clients {
    controllers: RwLock<HashMap<String, Option<String>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, id: impl Into<String>, controller: Option<&str>) {
        self.controllers
            .write()
            .await
            .insert(id.into(), controller.map(str::to_string));
    }

    pub async fn close(&self, id: &str) -> bool {
        self.controllers.write().await.remove(id).is_some()
    }

    pub async fn controller(&self, id: &str) -> Option<String> {
        self.controllers.read().await.get(id).cloned().flatten()
    }

    /// Put every open page under `version`; returns how many changed hands.
    pub async fn claim(&self, version: &str) -> usize {
        let mut controllers = self.controllers.write().await;
        let mut claimed = 0;
        for controller in controllers.values_mut() {
            if controller.as_deref() != Some(version) {
                *controller = Some(version.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    pub async fn controlled_by(&self, version: &str) -> usize {
        self.controllers
            .read()
            .await
            .values()
            .filter(|c| c.as_deref() == Some(version))
            .count()
    }
}

pub struct Registration {
    clients: Arc<Clients>,
    active: Option<Arc<OfflineCacheManager>>,
    waiting: Option<Arc<OfflineCacheManager>>,
}

impl Registration {
    pub fn new(clients: Arc<Clients>) -> Self {
        Self {
            clients,
            active: None,
            waiting: None,
        }
    }

    pub fn active(&self) -> Option<&Arc<OfflineCacheManager>> {
        self.active.as_ref()
    }

    pub fn waiting(&self) -> Option<&Arc<OfflineCacheManager>> {
        self.waiting.as_ref()
    }

    /// Install a new version. Returns the activation report when it was
    /// promoted straight away, `None` when it is left waiting. A failed
    /// install leaves the current active version in charge.
    pub async fn register(
        &mut self,
        manager: Arc<OfflineCacheManager>,
    ) -> Result<Option<ActivationReport>, CacheError> {
        manager.install().await?;
        if let Some(previous) = self.waiting.replace(manager) {
            previous.mark_redundant().await;
        }
        self.try_promote().await
    }

    /// Adopt a version installed by an earlier run.
    pub async fn restore(&mut self, manager: Arc<OfflineCacheManager>) -> Result<bool, CacheError> {
        if !manager.restore().await? {
            return Ok(false);
        }
        if let Some(previous) = self.active.replace(manager) {
            previous.mark_redundant().await;
        }
        Ok(true)
    }

    /// Deliver a control message to the waiting version (or the active one
    /// if none is waiting), then promote if the message released it.
    pub async fn post_message(
        &mut self,
        message: &str,
    ) -> Result<Option<ActivationReport>, CacheError> {
        if let Some(target) = self.waiting.as_ref().or(self.active.as_ref()) {
            target.handle_message(message);
        }
        self.try_promote().await
    }

    /// A page loaded now is controlled by the active version, if any.
    pub async fn open_client(&self, id: &str) {
        let controller = self.active.as_ref().map(|m| m.cache_name());
        self.clients.open(id, controller).await;
    }

    pub async fn close_client(&mut self, id: &str) -> Result<Option<ActivationReport>, CacheError> {
        self.clients.close(id).await;
        self.try_promote().await
    }

    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        match &self.active {
            Some(manager) => manager.handle_fetch(request).await,
            None => FetchOutcome::Passthrough,
        }
    }

    async fn try_promote(&mut self) -> Result<Option<ActivationReport>, CacheError> {
        let ready = match (&self.waiting, &self.active) {
            (None, _) => return Ok(None),
            (Some(_), None) => true,
            (Some(waiting), Some(active)) => {
                waiting.skip_waiting_requested()
                    || self.clients.controlled_by(active.cache_name()).await == 0
            }
        };
        if !ready {
            debug!("New version waiting for open pages to close");
            return Ok(None);
        }

        let Some(next) = self.waiting.take() else {
            return Ok(None);
        };
        if let Some(previous) = self.active.take() {
            previous.mark_redundant().await;
            // Its refreshes write to the old bucket; settle them before cleanup.
            previous.wait_until_idle().await;
        }
        let report = next.activate().await?;
        info!(
            cache = %next.cache_name(),
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Version activated"
        );
        self.active = Some(next);
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryStorage};
    use crate::config::Config;
    use crate::models::ResponseSource;
    use crate::test_support::{url, ScriptedFetcher};

    fn manager(
        version: &str,
        skip_waiting: bool,
        storage: &Arc<MemoryStorage>,
        fetcher: &Arc<ScriptedFetcher>,
        clients: &Arc<Clients>,
    ) -> Arc<OfflineCacheManager> {
        let config = Config {
            version: version.to_string(),
            skip_waiting,
            ..Config::default()
        };
        Arc::new(
            OfflineCacheManager::new(config, storage.clone(), fetcher.clone(), clients.clone())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_clients_claim_counts_changes() {
        let clients = Clients::new();
        clients.open("a", Some("v1")).await;
        clients.open("b", Some("v2")).await;
        clients.open("c", None).await;

        assert_eq!(clients.claim("v2").await, 2);
        assert_eq!(clients.controlled_by("v2").await, 3);
        assert_eq!(clients.claim("v2").await, 0);

        assert!(clients.close("a").await);
        assert!(!clients.close("a").await);
        assert_eq!(clients.controlled_by("v2").await, 2);
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        assert!(registration.fetch(crate::models::Request::get(url("/"))).await.is_passthrough());

        let v1 = manager("v1", false, &storage, &fetcher, &clients);
        let report = registration.register(v1.clone()).await.unwrap();
        assert!(report.is_some());
        assert_eq!(v1.state().await, WorkerState::Activated);

        let outcome = registration.fetch(crate::models::Request::get(url("/"))).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    }

    #[tokio::test]
    async fn test_skip_waiting_replaces_immediately() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        let v1 = manager("v1", true, &storage, &fetcher, &clients);
        registration.register(v1.clone()).await.unwrap();
        registration.open_client("tab-1").await;

        let v2 = manager("v2", true, &storage, &fetcher, &clients);
        let report = registration.register(v2.clone()).await.unwrap().unwrap();

        assert_eq!(report.deleted, vec!["expense-tracker-v1"]);
        assert_eq!(report.claimed, 1);
        assert_eq!(v1.state().await, WorkerState::Redundant);
        assert_eq!(clients.controller("tab-1").await.as_deref(), Some("expense-tracker-v2"));
        assert_eq!(storage.keys().await.unwrap(), vec!["expense-tracker-v2"]);
    }

    #[tokio::test]
    async fn test_replaced_version_refresh_leaves_one_bucket() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        let v1 = manager("v1", true, &storage, &fetcher, &clients);
        registration.register(v1.clone()).await.unwrap();
        let outcome = registration
            .fetch(crate::models::Request::get(url("/style.css")))
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Cache));

        let v2 = manager("v2", true, &storage, &fetcher, &clients);
        let report = registration.register(v2.clone()).await.unwrap().unwrap();
        v1.wait_until_idle().await;

        assert_eq!(report.deleted, vec!["expense-tracker-v1"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["expense-tracker-v2"]);
    }

    #[tokio::test]
    async fn test_waiting_version_released_by_message() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        registration
            .register(manager("v1", false, &storage, &fetcher, &clients))
            .await
            .unwrap();
        registration.open_client("tab-1").await;

        let v2 = manager("v2", false, &storage, &fetcher, &clients);
        assert!(registration.register(v2.clone()).await.unwrap().is_none());
        assert_eq!(v2.state().await, WorkerState::Installed);
        assert_eq!(
            registration.active().map(|m| m.cache_name().to_string()),
            Some("expense-tracker-v1".to_string())
        );

        assert!(registration.post_message("hello").await.unwrap().is_none());
        let report = registration.post_message("skipWaiting").await.unwrap();
        assert!(report.is_some());
        assert_eq!(v2.state().await, WorkerState::Activated);
        assert!(registration.waiting().is_none());
    }

    #[tokio::test]
    async fn test_waiting_version_promoted_when_pages_close() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        registration
            .register(manager("v1", false, &storage, &fetcher, &clients))
            .await
            .unwrap();
        registration.open_client("tab-1").await;
        registration
            .register(manager("v2", false, &storage, &fetcher, &clients))
            .await
            .unwrap();
        assert!(registration.waiting().is_some());

        let report = registration.close_client("tab-1").await.unwrap();
        assert!(report.is_some());
        assert_eq!(
            registration.active().map(|m| m.cache_name().to_string()),
            Some("expense-tracker-v2".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_install_keeps_active_version() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());
        let mut registration = Registration::new(clients.clone());

        registration
            .register(manager("v1", true, &storage, &fetcher, &clients))
            .await
            .unwrap();

        fetcher.set_online(false);
        let v2 = manager("v2", true, &storage, &fetcher, &clients);
        assert!(registration.register(v2.clone()).await.is_err());

        assert_eq!(v2.state().await, WorkerState::Redundant);
        assert_eq!(
            registration.active().map(|m| m.cache_name().to_string()),
            Some("expense-tracker-v1".to_string())
        );
        assert_eq!(storage.keys().await.unwrap(), vec!["expense-tracker-v1"]);
    }

    #[tokio::test]
    async fn test_restore_adopts_existing_bucket() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(ScriptedFetcher::with_shell());
        let clients = Arc::new(Clients::new());

        let mut first = Registration::new(clients.clone());
        first
            .register(manager("v1", true, &storage, &fetcher, &clients))
            .await
            .unwrap();

        let mut second = Registration::new(clients.clone());
        let restored = manager("v1", true, &storage, &fetcher, &clients);
        assert!(second.restore(restored.clone()).await.unwrap());
        assert_eq!(restored.state().await, WorkerState::Activated);

        let missing = manager("v9", true, &storage, &fetcher, &clients);
        assert!(!Registration::new(clients).restore(missing).await.unwrap());
    }
}

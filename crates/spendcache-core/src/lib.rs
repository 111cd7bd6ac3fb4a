//! Offline asset cache for the expense tracker shell.
//!
//! This crate keeps the application shell available without network
//! connectivity while keeping cached content reasonably fresh:
//!
//! - `manager`: `OfflineCacheManager` (install, activate, fetch routing)
//! - `lifecycle`: worker states, open clients, version handoff
//! - `routing`: third-party / origin-static / other classification
//! - `cache`: bucket storage (memory and disk backends)
//! - `network`: the `Fetcher` seam and its reqwest implementation
//! - `config`: origin, version tag, asset manifest, allowlist

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod network;
pub mod routing;

#[cfg(test)]
mod test_support;

pub use reqwest::{Method, Url};

pub use cache::{CacheStorage, CachedData, DiskStorage, MemoryStorage};
pub use config::Config;
pub use error::{CacheError, FetchError};
pub use lifecycle::{Clients, Registration, WorkerState};
pub use manager::{ActivationReport, OfflineCacheManager, SKIP_WAITING_MESSAGE, SYNC_EXPENSES_TAG};
pub use models::{
    Destination, FetchOutcome, Notification, Request, RequestKey, RequestMode, ResponseSource,
    StoredResponse,
};
pub use network::{Fetcher, HttpFetcher};
pub use routing::{classify, RequestClass};

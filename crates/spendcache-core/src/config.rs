//! Cache configuration.
//!
//! Holds the origin being cached, the version tag that names the current
//! bucket, the static asset manifest, the offline page and the third-party
//! hosts allowed into the cache.
//!
//! Configuration is stored at `~/.config/spendcache/config.json`; every field
//! is optional in the file and falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "spendcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

pub const DEFAULT_CACHE_PREFIX: &str = "expense-tracker";

pub const DEFAULT_VERSION: &str = "v1";

/// Application shell, pre-cached at install.
pub const DEFAULT_STATIC_ASSETS: [&str; 6] = [
    "/",
    "/index.html",
    "/style.css",
    "/script.js",
    "/manifest.json",
    "/offline.html",
];

pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Chart library CDN.
pub const DEFAULT_THIRD_PARTY_HOSTS: [&str; 1] = ["cdn.jsdelivr.net"];

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    pub cache_prefix: String,
    pub version: String,
    pub static_assets: Vec<String>,
    pub offline_page: String,
    /// Exact host names, or `*.example.com` for any subdomain.
    pub third_party_hosts: Vec<String>,
    pub request_timeout_secs: u64,
    /// Replace the running version as soon as install succeeds.
    pub skip_waiting: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
            offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
            third_party_hosts: DEFAULT_THIRD_PARTY_HOSTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            skip_waiting: true,
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Name of the current bucket, e.g. `expense-tracker-v1`.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin URL: {}", self.origin))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            anyhow::bail!("Origin must be http or https: {}", self.origin);
        }
        crate::cache::validate_bucket_name(&self.cache_name())?;
        if let Some(asset) = self.static_assets.iter().find(|a| !a.starts_with('/')) {
            anyhow::bail!("Static asset must be a root-relative path: {}", asset);
        }
        if !self.static_assets.contains(&self.offline_page) {
            anyhow::bail!(
                "Offline page {} must be listed in static_assets",
                self.offline_page
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

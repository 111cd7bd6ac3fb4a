//! Request classification.
//!
//! Every intercepted request falls into exactly one class, decided from the
//! URL alone:
//! - `ThirdParty`: host is on the allowlist (cache-first, no revalidation)
//! - `OriginStatic`: path is a manifest asset or ends in a static suffix
//!   (stale-while-revalidate)
//! - `Other`: everything else (network-first)

use reqwest::Url;

use crate::config::Config;

/// Path suffixes treated as static shell assets.
const STATIC_SUFFIXES: [&str; 4] = [".html", ".css", ".js", ".json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    ThirdParty,
    OriginStatic,
    Other,
}

pub fn classify(config: &Config, url: &Url) -> RequestClass {
    let third_party = url.host_str().is_some_and(|host| {
        config
            .third_party_hosts
            .iter()
            .any(|pattern| host_matches(pattern, host))
    });
    if third_party {
        return RequestClass::ThirdParty;
    }

    // Matches on path only; the host is not consulted here
    let path = url.path();
    if config.static_assets.iter().any(|asset| asset == path)
        || STATIC_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
    {
        return RequestClass::OriginStatic;
    }

    RequestClass::Other
}

/// `pattern` is either an exact host or `*.suffix` for any subdomain.
fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", suffix.to_ascii_lowercase())),
        None => pattern.eq_ignore_ascii_case(host),
    }
}

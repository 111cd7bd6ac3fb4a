use std::fmt;

use serde::{Deserialize, Serialize};

/// A response captured from the network, as kept in a cache bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "body_encoding")]
    pub body: Vec<u8>,
}

impl StoredResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Bodies are stored as base64 so binary assets survive the JSON bucket files.
mod body_encoding {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// The offline page, served in place of a failed navigation.
    OfflineFallback,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::OfflineFallback => "offline-fallback",
        };
        f.write_str(label)
    }
}

/// Result of routing a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; default network handling applies.
    Passthrough,
    Served {
        response: StoredResponse,
        source: ResponseSource,
    },
    /// Intercepted but nothing to answer with; the request fails.
    Unavailable,
}

impl FetchOutcome {
    pub fn served(response: StoredResponse, source: ResponseSource) -> Self {
        FetchOutcome::Served { response, source }
    }

    pub fn response(&self) -> Option<&StoredResponse> {
        match self {
            FetchOutcome::Served { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Served { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = StoredResponse::new("http://localhost/style.css", 200, "body{}");
        response
            .headers
            .push(("Content-Type".to_string(), "text/css".to_string()));
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn test_binary_body_survives_json() {
        let response = StoredResponse::new("http://localhost/icon.png", 200, vec![0u8, 159, 146, 150]);
        let json = serde_json::to_string(&response).expect("serialize");
        assert!(json.contains("\"AJ+Slg==\""));
        let parsed: StoredResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.body, vec![0u8, 159, 146, 150]);
    }

    #[test]
    fn test_success_range() {
        assert!(StoredResponse::new("u", 200, "").is_success());
        assert!(StoredResponse::new("u", 204, "").is_success());
        assert!(!StoredResponse::new("u", 304, "").is_success());
        assert!(!StoredResponse::new("u", 404, "").is_success());
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = FetchOutcome::served(StoredResponse::new("u", 200, "ok"), ResponseSource::Cache);
        assert_eq!(outcome.source(), Some(ResponseSource::Cache));
        assert_eq!(outcome.response().map(|r| r.text()), Some("ok".to_string()));
        assert!(FetchOutcome::Passthrough.is_passthrough());
        assert!(FetchOutcome::Unavailable.response().is_none());
    }
}

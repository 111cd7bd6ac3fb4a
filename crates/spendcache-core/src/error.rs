use thiserror::Error;

use crate::lifecycle::WorkerState;

/// Failure to obtain a response from the network.
///
/// An HTTP error status is not a `FetchError`: like a browser fetch, any
/// status the server answers with resolves to a response.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Host unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to cache {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },

    #[error("Invalid cache name: {0:?}")]
    InvalidBucketName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short_is_untouched() {
        assert_eq!(truncate_body("Not Found"), "Not Found");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(800);
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 800 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        // 499 ASCII bytes followed by multi-byte characters straddling the limit
        let body = format!("{}{}", "a".repeat(499), "€".repeat(10));
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"a".repeat(499)));
        assert!(!truncated.contains('€'));
    }

    #[test]
    fn test_install_failed_message() {
        let err = CacheError::InstallFailed {
            url: "http://localhost:8080/style.css".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to cache http://localhost:8080/style.css: HTTP 404");
    }
}

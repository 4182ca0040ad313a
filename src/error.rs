//! Crate-level error type.
//!
//! Every fallible public API returns `Result<T, ChatError>`. Variants group
//! into three families that callers treat differently:
//!
//! - network failures ([`ChatError::Network`], [`ChatError::Http`],
//!   [`ChatError::Decode`]) surface as a visible inline error,
//! - persistence failures ([`ChatError::Storage`], [`ChatError::Io`],
//!   [`ChatError::Serialization`]) are logged and swallowed,
//! - rejected input ([`ChatError::EmptyMessage`], [`ChatError::Throttled`],
//!   [`ChatError::Busy`], [`ChatError::InvalidRating`]) leaves state as it was.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The request never produced an HTTP response (connect, timeout, reset).
    #[error("connection to {url} failed: {detail}")]
    Network { url: String, detail: String },

    /// The service replied with a non-2xx status code. `detail` is the
    /// service's `error` text, or the status reason when it sent none.
    #[error("HTTP {status} from {url}: {detail}")]
    Http { status: u16, url: String, detail: String },

    /// The response body was not the JSON shape we expect.
    #[error("could not decode response: {detail}")]
    Decode { detail: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("message is empty")]
    EmptyMessage,

    #[error("submission throttled, try again shortly")]
    Throttled,

    #[error("a request is already in flight")]
    Busy,


    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// True for failures that came from talking to a remote service.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ChatError::Network { .. } | ChatError::Http { .. } | ChatError::Decode { .. }
        )
    }

    /// True for failures of the local durable store.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            ChatError::Storage(_) | ChatError::Io(_) | ChatError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_display_contains_status_and_url() {
        let err = ChatError::Http {
            status: 503,
            url: "http://localhost:5000/analyze".to_string(),
            detail: "model not loaded".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("503"), "status missing: {s}");
        assert!(s.contains("/analyze"), "url missing: {s}");
        assert!(s.ends_with(": model not loaded"), "detail missing: {s}");
    }

    #[test]
    fn network_display_contains_detail() {
        let err = ChatError::Network {
            url: "http://localhost:5000".to_string(),
            detail: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn invalid_rating_display() {
        assert_eq!(
            ChatError::InvalidRating(7).to_string(),
            "rating must be between 1 and 5, got 7"
        );
    }

    #[test]
    fn classification_network() {
        assert!(ChatError::Http { status: 500, url: "x".into(), detail: String::new() }.is_network());
        assert!(ChatError::Decode { detail: "bad".into() }.is_network());
        assert!(!ChatError::Storage("disk full".into()).is_network());
    }

    #[test]
    fn classification_persistence() {
        assert!(ChatError::Storage("disk full".into()).is_persistence());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(ChatError::from(io).is_persistence());
        assert!(!ChatError::Busy.is_persistence());
    }

    #[test]
    fn serde_error_converts() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let chat: ChatError = err.into();
        assert!(matches!(chat, ChatError::Serialization(_)));
    }
}

//! HTTP client for the analysis service.
//!
//! [`AnalysisService`] and [`FeedbackSink`] are the seams the pipeline and
//! the feedback queue are written against; [`HttpClient`] implements both
//! over `reqwest`, tests substitute in-process fakes.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::analysis::AnalysisResult;
use crate::api::{AnalyzeRequest, RawAnalyzeResponse, ServiceError};
use crate::error::ChatError;
use crate::feedback::FeedbackRecord;

/// Something that can turn a message into an [`AnalysisResult`].
pub trait AnalysisService {
    fn analyze(
        &self,
        request: &AnalyzeRequest,
    ) -> impl Future<Output = Result<AnalysisResult, ChatError>> + Send;
}

/// Something that accepts feedback records. `Ok` means acknowledged.
pub trait FeedbackSink {
    fn deliver(&self, record: &FeedbackRecord) -> impl Future<Output = Result<(), ChatError>> + Send;
}

/// Connection settings for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the service (e.g. `http://127.0.0.1:5000`).
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpClientConfig {
    /// Defaults: 3 s connect timeout, 10 s request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Self {
        // Builder failure only happens in broken TLS environments; fall back
        // to the default client rather than refusing to start.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// POST `body` as JSON and return the response once it is known to be 2xx.
    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ChatError> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<ServiceError>()
                .await
                .map(|e| e.error)
                .ok()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("no detail").to_string());
            warn!(status = status.as_u16(), url = %url, detail = %detail, "service returned an error status");
            return Err(ChatError::Http {
                status: status.as_u16(),
                url,
                detail,
            });
        }
        Ok(resp)
    }
}

impl AnalysisService for HttpClient {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, ChatError> {
        debug!(session_id = %request.session_id, relationship = %request.relationship, "POST /analyze");
        let resp = self.post_json("/analyze", request).await?;
        let bytes = resp.bytes().await.map_err(|e| ChatError::Decode {
            detail: e.to_string(),
        })?;
        let raw: RawAnalyzeResponse =
            serde_json::from_slice(&bytes).map_err(|e| ChatError::Decode {
                detail: e.to_string(),
            })?;
        Ok(AnalysisResult::from_raw(raw))
    }
}

impl FeedbackSink for HttpClient {
    async fn deliver(&self, record: &FeedbackRecord) -> Result<(), ChatError> {
        debug!(session_id = %record.session_id, rating = record.rating, "POST /feedback");
        self.post_json("/feedback", record).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = HttpClientConfig::new("http://localhost:5000");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_strips_trailing_slash() {
        let cfg = HttpClientConfig::new("http://localhost:5000/");
        assert_eq!(cfg.base_url, "http://localhost:5000");
    }

    #[test]
    fn config_overrides() {
        let cfg = HttpClientConfig::new("http://x")
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(1));
        assert_eq!(cfg.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn url_joins_path() {
        let client = HttpClient::new(HttpClientConfig::new("http://127.0.0.1:5000"));
        assert_eq!(client.url("/analyze"), "http://127.0.0.1:5000/analyze");
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
    }

    #[tokio::test]
    async fn analyze_unreachable_host_is_network_error() {
        // Port 9 (discard) on loopback is closed on any sane test machine.
        let client = HttpClient::new(
            HttpClientConfig::new("http://127.0.0.1:9").connect_timeout(Duration::from_millis(500)),
        );
        let req = AnalyzeRequest {
            text: "hi".into(),
            relationship: "neutral".into(),
            session_id: "s".into(),
        };
        let err = client.analyze(&req).await.unwrap_err();
        assert!(matches!(err, ChatError::Network { .. }), "got {err:?}");
        assert!(err.is_network());
    }
}

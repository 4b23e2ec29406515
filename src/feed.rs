//! Feed source capability
//!
//! Raw social-engagement signals come from an external feed service and are
//! polled by the engagement predictor and the model trainer.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;
use crate::model::FeedSignal;

/// Pull-based source of engagement signals.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Signals recorded at or after `since_ms` (unix milliseconds).
    async fn recent_signals(&self, since_ms: i64) -> Result<Vec<FeedSignal>, TransportError>;
}

/// HTTP client for a remote feed service.
pub struct HttpFeedSource {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SignalsResponse {
    signals: Vec<FeedSignal>,
}

impl HttpFeedSource {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn recent_signals(&self, since_ms: i64) -> Result<Vec<FeedSignal>, TransportError> {
        let url = format!("{}/signals?since={}", self.base_url, since_ms);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let body: SignalsResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        debug!(since_ms, count = body.signals.len(), "Polled feed signals");
        Ok(body.signals)
    }
}

//! REST client for the stock list, the bounded tick history, and the latest
//! tick. These endpoints feed the cold-start path; the live path is the
//! WebSocket subscriber.

use crate::{error::FeedError, tick::RawTick};
use serde::Deserialize;
use serde_json::Value;
use smol_str::SmolStr;
use std::time::Duration;

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ApiConfig {
    /// Read the base URL from `CHARTFEED_API_URL`, keeping defaults
    /// otherwise.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CHARTFEED_API_URL") {
            config.base_url = url;
        }
        config
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One listed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockInfo {
    pub code: SmolStr,
    pub name: String,
}

/// HTTP client over the backend's stock endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_defaults() -> Result<Self, FeedError> {
        Self::new(ApiConfig::default())
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// List all tradable instruments.
    pub async fn stocks(&self) -> Result<Vec<StockInfo>, FeedError> {
        let response = self.client.get(self.endpoint("/api/stocks")).send().await?;
        response.error_for_status_ref()?;
        response
            .json::<Vec<StockInfo>>()
            .await
            .map_err(|error| FeedError::ApiDecode(error.to_string()))
    }

    /// Fetch up to `limit` raw ticks for one symbol, oldest first.
    pub async fn history(&self, code: &str, limit: usize) -> Result<Vec<RawTick>, FeedError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/api/stocks/{code}/history")))
            .query(&[("limit", limit)])
            .send()
            .await?;
        response.error_for_status_ref()?;
        response
            .json::<Vec<RawTick>>()
            .await
            .map_err(|error| FeedError::ApiDecode(error.to_string()))
    }

    /// Fetch the most recent raw tick for one symbol.
    pub async fn latest(&self, code: &str) -> Result<RawTick, FeedError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/api/stocks/{code}/latest")))
            .send()
            .await?;
        response.error_for_status_ref()?;
        let value = response
            .json::<Value>()
            .await
            .map_err(|error| FeedError::ApiDecode(error.to_string()))?;
        decode_latest(value)
    }
}

/// The latest endpoint answers with either a raw tick record or an
/// `{"error": ...}` payload.
fn decode_latest(value: Value) -> Result<RawTick, FeedError> {
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(FeedError::ApiPayload(error.to_string()));
    }
    serde_json::from_value::<RawTick>(value)
        .map_err(|error| FeedError::ApiDecode(error.to_string()))
}

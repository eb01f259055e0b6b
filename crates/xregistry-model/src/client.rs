//! Endpoint fetching
//!
//! [`EndpointFetcher`] performs one bounded GET per endpoint and records
//! the outcome in the [`EndpointCache`]. The HTTP call itself sits behind
//! [`ModelTransport`] so the aggregation logic can run against scripted
//! transports in tests.

use crate::cache::{EndpointCache, EndpointStatus};
use crate::config::Endpoint;
use crate::error::{FetchError, Result};
use crate::model::RegistryModel;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fetches a model document from a URL
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// GET `url` and return its JSON body. `Ok(None)` means the server
    /// answered successfully with an empty or `null` body.
    async fn get_json(&self, url: &str) -> std::result::Result<Option<Value>, FetchError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("xregistry-model/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }

    /// Use an existing client (shared connection pool, proxies, ...)
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn get_json(&self, url: &str) -> std::result::Result<Option<Value>, FetchError> {
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Error"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(e.to_string()))?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| FetchError::InvalidModel(e.to_string()))?;
        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }
}

/// Loads one endpoint's model with a hard deadline
pub struct EndpointFetcher {
    transport: Arc<dyn ModelTransport>,
    cache: Arc<EndpointCache>,
    timeout: Duration,
}

impl EndpointFetcher {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        cache: Arc<EndpointCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            cache,
            timeout,
        }
    }

    /// Fetch the endpoint and record exactly one terminal status for it.
    ///
    /// The status is returned even when a cache clear raced with the fetch
    /// and the write was dropped.
    pub async fn fetch(&self, endpoint: &Endpoint) -> EndpointStatus {
        let generation = self.cache.generation().await;
        self.cache
            .set_if_current(&endpoint.key, EndpointStatus::loading(), generation)
            .await;

        debug!("Fetching {:?} model from {}", endpoint.kind, endpoint.url);
        let started = Instant::now();
        let timeout_ms = self.timeout.as_millis() as u64;

        let request = self.transport.get_json(&endpoint.url);
        let status = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                warn!("Model fetch from {} timed out after {}ms", endpoint.url, timeout_ms);
                EndpointStatus::timeout(FetchError::Timeout(timeout_ms).to_string(), timeout_ms)
            }
            Ok(result) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match result.and_then(parse_model) {
                    Ok(model) => {
                        info!(
                            "Loaded model from {} in {}ms ({} group types)",
                            endpoint.url,
                            elapsed_ms,
                            model.groups.len()
                        );
                        EndpointStatus::success(model, elapsed_ms)
                    }
                    Err(e) => {
                        warn!("Failed to load model from {}: {}", endpoint.url, e);
                        EndpointStatus::failed(e.to_string(), elapsed_ms)
                    }
                }
            }
        };

        self.cache
            .set_if_current(&endpoint.key, status.clone(), generation)
            .await;
        status
    }
}

fn parse_model(body: Option<Value>) -> std::result::Result<RegistryModel, FetchError> {
    let value = body.ok_or(FetchError::EmptyModel)?;
    RegistryModel::from_value(value).map_err(|e| FetchError::InvalidModel(e.to_string()))
}

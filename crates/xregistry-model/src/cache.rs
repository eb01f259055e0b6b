//! Per-endpoint status cache
//!
//! Holds the load status of every endpoint we have tried, keyed by the
//! endpoint string as configured. Terminal entries stay until [`clear`]
//! is called; `failed` and `timeout` entries contribute no model but still
//! stop the endpoint from being fetched again.
//!
//! [`clear`]: EndpointCache::clear

use crate::model::RegistryModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lifecycle state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Loading,
    Success,
    Failed,
    Timeout,
}

impl LoadStatus {
    /// Anything but `Loading`
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoadStatus::Loading)
    }
}

/// Cached outcome of loading an endpoint's model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub model: Option<RegistryModel>,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EndpointStatus {
    pub fn loading() -> Self {
        Self {
            model: None,
            status: LoadStatus::Loading,
            load_time_ms: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn success(model: RegistryModel, load_time_ms: u64) -> Self {
        Self {
            model: Some(model),
            status: LoadStatus::Success,
            load_time_ms: Some(load_time_ms),
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>, load_time_ms: u64) -> Self {
        Self {
            model: None,
            status: LoadStatus::Failed,
            load_time_ms: Some(load_time_ms),
            error: Some(error.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn timeout(error: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            model: None,
            status: LoadStatus::Timeout,
            load_time_ms: Some(timeout_ms),
            error: Some(error.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// The model this entry contributes to a merge, if any
    pub fn contributed_model(&self) -> Option<&RegistryModel> {
        match self.status {
            LoadStatus::Success => self.model.as_ref(),
            _ => None,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by a terminal entry
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Writes dropped because a clear happened after the fetch began
    pub stale_writes: u64,
}

struct CacheInner {
    entries: HashMap<String, EndpointStatus>,
    generation: u64,
    stats: CacheStats,
}

/// Endpoint status store shared by the fetcher, coordinator and service
pub struct EndpointCache {
    inner: RwLock<CacheInner>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                generation: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Current status of an endpoint, whatever state it is in
    pub async fn get(&self, endpoint: &str) -> Option<EndpointStatus> {
        self.inner.read().await.entries.get(endpoint).cloned()
    }

    /// Terminal status of an endpoint; `None` while unknown or loading
    pub async fn get_resolved(&self, endpoint: &str) -> Option<EndpointStatus> {
        let mut inner = self.inner.write().await;
        let resolved = inner
            .entries
            .get(endpoint)
            .filter(|status| status.is_resolved())
            .cloned();

        if resolved.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        resolved
    }

    /// Insert or replace an endpoint's status
    pub async fn set(&self, endpoint: &str, status: EndpointStatus) {
        let mut inner = self.inner.write().await;
        inner.entries.insert(endpoint.to_string(), status);
    }

    /// Like [`set`](Self::set), but only if no clear has happened since
    /// `generation` was observed. Returns whether the write landed.
    pub async fn set_if_current(
        &self,
        endpoint: &str,
        status: EndpointStatus,
        generation: u64,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            inner.stats.stale_writes += 1;
            debug!("Dropping stale status for {} (cache was cleared)", endpoint);
            return false;
        }
        inner.entries.insert(endpoint.to_string(), status);
        true
    }

    pub async fn is_resolved(&self, endpoint: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .get(endpoint)
            .map(EndpointStatus::is_resolved)
            .unwrap_or(false)
    }

    /// Counter bumped by every [`clear`](Self::clear)
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Remove every endpoint
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.generation += 1;
        info!("Endpoint cache cleared ({} entries)", removed);
    }

    /// All entries, sorted by endpoint
    pub async fn snapshot(&self) -> Vec<(String, EndpointStatus)> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .map(|(endpoint, status)| (endpoint.clone(), status.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new()
    }
}

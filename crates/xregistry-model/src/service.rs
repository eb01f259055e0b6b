//! Model service - the interface the viewer consumes
//!
//! Owns the endpoint cache and the merged-model cache, and coalesces
//! concurrent requests onto one aggregation. Endpoint failures never
//! surface here; the worst case is the fallback model.

use crate::aggregator::{AggregationCoordinator, ModelStream, ProgressiveFeed, ProgressiveResult};
use crate::cache::{EndpointCache, EndpointStatus, LoadStatus};
use crate::client::{EndpointFetcher, HttpTransport, ModelTransport};
use crate::config::ModelServiceConfig;
use crate::error::Result;
use crate::model::RegistryModel;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type SharedModel = Shared<BoxFuture<'static, RegistryModel>>;

struct ServiceState {
    config: ModelServiceConfig,
    coordinator: AggregationCoordinator,
    /// Bumped by every invalidation; results from older runs are dropped
    generation: u64,
    complete: Option<RegistryModel>,
    pending: Option<SharedModel>,
    progressive: Option<ProgressiveFeed>,
}

/// Aggregated registry model with caching and request coalescing
pub struct ModelService {
    transport: Arc<dyn ModelTransport>,
    cache: Arc<EndpointCache>,
    default_model: RegistryModel,
    state: Arc<Mutex<ServiceState>>,
}

/// Service statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelServiceStats {
    pub configured_endpoints: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub loading: usize,
    pub has_complete_model: bool,
}

impl ModelService {
    /// Create a service with its own endpoint cache
    pub fn new(config: ModelServiceConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self::with_cache(config, transport, Arc::new(EndpointCache::new()))
    }

    /// Create a service over an existing endpoint cache
    pub fn with_cache(
        config: ModelServiceConfig,
        transport: Arc<dyn ModelTransport>,
        cache: Arc<EndpointCache>,
    ) -> Self {
        let default_model = RegistryModel::fallback();
        let coordinator = build_coordinator(&config, &transport, &cache, &default_model);

        Self {
            transport,
            cache,
            default_model,
            state: Arc::new(Mutex::new(ServiceState {
                config,
                coordinator,
                generation: 0,
                complete: None,
                pending: None,
                progressive: None,
            })),
        }
    }

    /// Create a service that talks HTTP
    pub fn from_config(config: ModelServiceConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::new(config, transport))
    }

    /// Create from the default configuration file
    pub fn from_default_config() -> Result<Self> {
        let config = ModelServiceConfig::load_default()?;
        Self::from_config(config)
    }

    /// The model used when nothing has loaded
    pub fn get_default_model(&self) -> RegistryModel {
        self.default_model.clone()
    }

    /// The fully aggregated model.
    ///
    /// Returns the cached model if a previous aggregation completed;
    /// otherwise joins the aggregation in flight or starts one.
    pub async fn get_registry_model(&self) -> RegistryModel {
        let pending = {
            let mut state = self.state.lock().await;
            if let Some(model) = &state.complete {
                debug!("Serving cached registry model");
                return model.clone();
            }
            match &state.pending {
                Some(pending) => {
                    debug!("Joining in-flight registry model aggregation");
                    pending.clone()
                }
                None => {
                    let pending = self.start_aggregation(&state);
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Progressively merged model.
    ///
    /// The stream yields the initial snapshot, then one update per resolved
    /// endpoint, and ends after the complete snapshot. Concurrent callers
    /// share the same aggregation and each sees every snapshot; once it has
    /// completed, callers get a single complete snapshot.
    pub async fn get_progressive_registry_model(&self) -> ModelStream {
        let mut state = self.state.lock().await;

        if let Some(model) = &state.complete {
            let total = state.coordinator.total();
            return ProgressiveFeed::completed(ProgressiveResult::complete(model.clone(), total))
                .subscribe()
                .await;
        }

        if let Some(feed) = &state.progressive {
            debug!("Joining in-flight progressive aggregation");
            return feed.subscribe().await;
        }

        let run = state.coordinator.progressive();
        let stream = run.stream().await;
        state.progressive = Some(run.feed.clone());

        let shared_state = self.state.clone();
        let generation = state.generation;
        tokio::spawn(async move {
            let outcome = run.completion.await;
            if outcome.is_err() {
                run.feed.close().await;
            }
            let mut state = shared_state.lock().await;
            if state.generation != generation {
                debug!("Discarding progressive result from before cache invalidation");
                return;
            }
            state.progressive = None;
            match outcome {
                Ok(model) => state.complete = Some(model),
                Err(e) => warn!("Progressive aggregation task failed: {}", e),
            }
        });

        stream
    }

    /// Configured API endpoints whose model declares `group_type`.
    ///
    /// A configured affinity rule for the group type takes precedence.
    /// When no endpoint qualifies, every API endpoint is returned so callers
    /// always have somewhere to look.
    pub async fn get_api_endpoints_for_group_type(&self, group_type: &str) -> Vec<String> {
        let config = self.state.lock().await.config.clone();

        let mut seen = HashSet::new();
        let all: Vec<String> = config
            .api_endpoints
            .iter()
            .filter(|endpoint| seen.insert(endpoint.as_str()))
            .cloned()
            .collect();

        if let Some(rule) = config.affinity_for(group_type) {
            let pinned: Vec<String> = all.iter().filter(|e| rule.matches(e)).cloned().collect();
            if !pinned.is_empty() {
                debug!("Group type {} pinned to {:?}", group_type, pinned);
                return pinned;
            }
            debug!(
                "Affinity for {} ('{}') matches no configured endpoint",
                group_type, rule.endpoint_contains
            );
        }

        let mut declaring = Vec::new();
        for endpoint in &all {
            let declares = self
                .cache
                .get(endpoint)
                .await
                .and_then(|status| {
                    status
                        .contributed_model()
                        .map(|m| m.has_group_type(group_type))
                })
                .unwrap_or(false);
            if declares {
                declaring.push(endpoint.clone());
            }
        }

        if declaring.is_empty() {
            debug!("No cached endpoint declares {}, using all {}", group_type, all.len());
            all
        } else {
            declaring
        }
    }

    /// Drop the merged model and any in-flight aggregation. Endpoint
    /// statuses are kept, so the next request re-merges without refetching.
    pub async fn clear_cache(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.complete = None;
        state.pending = None;
        state.progressive = None;
        info!("Registry model cache cleared");
    }

    /// Drop everything, forcing fresh requests to every endpoint
    pub async fn clear_all_caches(&self) {
        let coordinator = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.complete = None;
            state.pending = None;
            state.progressive = None;
            state.coordinator.clone()
        };
        coordinator.clear_inflight().await;
        self.cache.clear().await;
        info!("All registry model caches cleared");
    }

    /// Swap in a new endpoint configuration and clear every cache
    pub async fn reconfigure(&self, config: ModelServiceConfig) {
        info!(
            "Reconfiguring model service: {} model URIs, {} API endpoints",
            config.model_uris.len(),
            config.api_endpoints.len()
        );
        let coordinator =
            build_coordinator(&config, &self.transport, &self.cache, &self.default_model);
        {
            let mut state = self.state.lock().await;
            state.coordinator.clear_inflight().await;
            state.config = config;
            state.coordinator = coordinator;
        }
        self.clear_all_caches().await;
    }

    /// Status of every endpoint the cache knows about
    pub async fn endpoint_statuses(&self) -> Vec<(String, EndpointStatus)> {
        self.cache.snapshot().await
    }

    pub async fn stats(&self) -> ModelServiceStats {
        let (configured_endpoints, has_complete_model) = {
            let state = self.state.lock().await;
            (state.coordinator.total(), state.complete.is_some())
        };

        let mut stats = ModelServiceStats {
            configured_endpoints,
            has_complete_model,
            ..Default::default()
        };
        for (_, status) in self.cache.snapshot().await {
            match status.status {
                LoadStatus::Success => stats.succeeded += 1,
                LoadStatus::Failed => stats.failed += 1,
                LoadStatus::Timeout => stats.timed_out += 1,
                LoadStatus::Loading => stats.loading += 1,
            }
        }
        stats
    }

    /// Get the endpoint cache
    pub fn cache(&self) -> &Arc<EndpointCache> {
        &self.cache
    }

    fn start_aggregation(&self, state: &ServiceState) -> SharedModel {
        let coordinator = state.coordinator.clone();
        let generation = state.generation;
        let shared_state = self.state.clone();
        let fallback = self.default_model.clone();

        let handle = tokio::spawn(async move {
            let model = coordinator.wait_for_all().await;
            let mut state = shared_state.lock().await;
            if state.generation == generation {
                state.complete = Some(model.clone());
                state.pending = None;
            } else {
                debug!("Discarding registry model from before cache invalidation");
            }
            model
        });

        let shared_state = self.state.clone();
        async move {
            match handle.await {
                Ok(model) => model,
                Err(e) => {
                    warn!("Registry model aggregation task failed: {}", e);
                    let mut state = shared_state.lock().await;
                    if state.generation == generation {
                        state.pending = None;
                    }
                    fallback
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn build_coordinator(
    config: &ModelServiceConfig,
    transport: &Arc<dyn ModelTransport>,
    cache: &Arc<EndpointCache>,
    default_model: &RegistryModel,
) -> AggregationCoordinator {
    let fetcher = Arc::new(EndpointFetcher::new(
        transport.clone(),
        cache.clone(),
        config.fetch_timeout(),
    ));
    AggregationCoordinator::new(
        config.endpoints(),
        fetcher,
        cache.clone(),
        default_model.clone(),
    )
}

//! Aggregation coordinator - fans out to every endpoint and merges the results
//!
//! Two ways to consume an aggregation:
//! - [`AggregationCoordinator::wait_for_all`] resolves once, after every
//!   endpoint has reached a terminal status.
//! - [`AggregationCoordinator::progressive`] publishes a running merge each
//!   time one endpoint resolves.
//!
//! Endpoints already resolved in the [`EndpointCache`] are reused. Fetches
//! for the same endpoint are shared between concurrent aggregations, and
//! each one runs on its own task so it reaches a terminal status even if
//! every caller has gone away.
//!
//! Merges always fold the resolved models in configured endpoint order,
//! so the outcome depends on which endpoints succeeded, never on which one
//! answered first.

use crate::cache::{EndpointCache, EndpointStatus, LoadStatus};
use crate::client::EndpointFetcher;
use crate::config::Endpoint;
use crate::merge::merge_all;
use crate::model::RegistryModel;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

type SharedStatus = Shared<BoxFuture<'static, EndpointStatus>>;

/// Stream of progressively merged models
pub type ModelStream = UnboundedReceiverStream<ProgressiveResult>;

/// One snapshot of a progressive aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveResult {
    pub model: RegistryModel,
    pub is_complete: bool,
    pub loaded_count: usize,
    pub total_count: usize,
}

impl ProgressiveResult {
    /// Nothing resolved yet
    pub fn initial(model: RegistryModel, total_count: usize) -> Self {
        Self {
            model,
            is_complete: total_count == 0,
            loaded_count: 0,
            total_count,
        }
    }

    /// Every endpoint resolved
    pub fn complete(model: RegistryModel, total_count: usize) -> Self {
        Self {
            model,
            is_complete: true,
            loaded_count: total_count,
            total_count,
        }
    }
}

struct FeedInner {
    history: Vec<ProgressiveResult>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressiveResult>>,
    closed: bool,
}

/// Snapshot log of one progressive aggregation.
///
/// Every subscriber receives every snapshot: the history so far on
/// subscribe, then each new one as it is published. Streams end once the
/// feed is closed.
#[derive(Clone)]
pub struct ProgressiveFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl ProgressiveFeed {
    fn new(initial: ProgressiveResult) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                history: vec![initial],
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// A closed feed holding a single snapshot
    pub fn completed(result: ProgressiveResult) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                history: vec![result],
                subscribers: Vec::new(),
                closed: true,
            })),
        }
    }

    pub async fn subscribe(&self) -> ModelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        for snapshot in &inner.history {
            // rx is still in hand, so this cannot fail
            let _ = tx.send(snapshot.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    /// Most recent snapshot
    pub async fn latest(&self) -> Option<ProgressiveResult> {
        self.inner.lock().await.history.last().cloned()
    }

    async fn publish(&self, result: ProgressiveResult) {
        let mut inner = self.inner.lock().await;
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(result.clone()).is_ok());
        inner.history.push(result);
    }

    /// Stop accepting snapshots and end every subscriber's stream
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscribers.clear();
    }
}

/// A running progressive aggregation
pub struct ProgressiveRun {
    pub feed: ProgressiveFeed,
    /// Resolves to the final merged model
    pub completion: JoinHandle<RegistryModel>,
}

impl ProgressiveRun {
    pub async fn stream(&self) -> ModelStream {
        self.feed.subscribe().await
    }
}

/// Fans out to all configured endpoints and merges what comes back
#[derive(Clone)]
pub struct AggregationCoordinator {
    endpoints: Arc<[Endpoint]>,
    fetcher: Arc<EndpointFetcher>,
    cache: Arc<EndpointCache>,
    default_model: Arc<RegistryModel>,
    /// Fetches currently on the wire, by endpoint key
    inflight: Arc<Mutex<HashMap<String, SharedStatus>>>,
}

impl AggregationCoordinator {
    pub fn new(
        endpoints: Vec<Endpoint>,
        fetcher: Arc<EndpointFetcher>,
        cache: Arc<EndpointCache>,
        default_model: RegistryModel,
    ) -> Self {
        Self {
            endpoints: endpoints.into(),
            fetcher,
            cache,
            default_model: Arc::new(default_model),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn total(&self) -> usize {
        self.endpoints.len()
    }

    /// Resolve every endpoint and return the merged model
    pub async fn wait_for_all(&self) -> RegistryModel {
        if self.endpoints.is_empty() {
            debug!("No endpoints configured, using default model");
            return self.default_model.as_ref().clone();
        }

        info!("Aggregating registry models from {} endpoints", self.endpoints.len());

        let statuses =
            join_all(self.endpoints.iter().map(|endpoint| self.resolve(endpoint))).await;
        let merged = merge_statuses(&self.default_model, statuses.iter());

        let succeeded = statuses
            .iter()
            .filter(|s| s.status == LoadStatus::Success)
            .count();
        info!(
            "Aggregation complete: {}/{} endpoints contributed, {} group types",
            succeeded,
            statuses.len(),
            merged.groups.len()
        );

        merged
    }

    /// Start a progressive aggregation.
    ///
    /// The feed holds the initial snapshot (default model, nothing loaded)
    /// immediately, then gains one snapshot per resolved endpoint.
    pub fn progressive(&self) -> ProgressiveRun {
        let initial =
            ProgressiveResult::initial(self.default_model.as_ref().clone(), self.total());
        let feed = ProgressiveFeed::new(initial);

        let coordinator = self.clone();
        let publisher = feed.clone();
        let completion = tokio::spawn(async move {
            let merged = coordinator.drive_progressive(&publisher).await;
            publisher.close().await;
            merged
        });

        ProgressiveRun { feed, completion }
    }

    /// Forget in-flight fetches so the next aggregation starts new ones.
    /// Fetches already running still finish on their own.
    pub async fn clear_inflight(&self) {
        let mut inflight = self.inflight.lock().await;
        if !inflight.is_empty() {
            debug!("Detaching {} in-flight endpoint fetches", inflight.len());
        }
        inflight.clear();
    }

    async fn drive_progressive(self, feed: &ProgressiveFeed) -> RegistryModel {
        let total = self.total();
        if total == 0 {
            return self.default_model.as_ref().clone();
        }

        info!("Progressively aggregating registry models from {} endpoints", total);

        let this = &self;
        let mut pending: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| async move { (index, this.resolve(endpoint).await) })
            .collect();

        let mut resolved: Vec<Option<EndpointStatus>> = vec![None; total];
        let mut loaded = 0;
        let mut merged = self.default_model.as_ref().clone();

        while let Some((index, status)) = pending.next().await {
            debug!(
                "Endpoint {} resolved as {:?} ({}/{})",
                self.endpoints[index].key,
                status.status,
                loaded + 1,
                total
            );
            resolved[index] = Some(status);
            loaded += 1;

            merged = merge_statuses(&self.default_model, resolved.iter().flatten());
            feed.publish(ProgressiveResult {
                model: merged.clone(),
                is_complete: loaded == total,
                loaded_count: loaded,
                total_count: total,
            })
            .await;
        }

        info!(
            "Progressive aggregation complete: {} group types from {} endpoints",
            merged.groups.len(),
            total
        );
        merged
    }

    /// Terminal status for one endpoint, fetching it if needed
    async fn resolve(&self, endpoint: &Endpoint) -> EndpointStatus {
        if let Some(status) = self.cache.get_resolved(&endpoint.key).await {
            return status;
        }

        let shared = {
            let mut inflight = self.inflight.lock().await;
            // A fetch may have landed while we waited for the lock
            let landed = self.cache.get(&endpoint.key).await;
            if let Some(status) = landed.filter(EndpointStatus::is_resolved) {
                return status;
            }
            match inflight.get(&endpoint.key) {
                Some(shared) => shared.clone(),
                None => {
                    let shared = self.spawn_fetch(endpoint);
                    inflight.insert(endpoint.key.clone(), shared.clone());
                    shared
                }
            }
        };

        let status = shared.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(&endpoint.key)
            .map(|current| current.ptr_eq(&shared))
            .unwrap_or(false)
        {
            inflight.remove(&endpoint.key);
        }
        status
    }

    fn spawn_fetch(&self, endpoint: &Endpoint) -> SharedStatus {
        let fetcher = self.fetcher.clone();
        let endpoint = endpoint.clone();
        let handle = tokio::spawn(async move { fetcher.fetch(&endpoint).await });

        async move {
            handle.await.unwrap_or_else(|e| {
                EndpointStatus::failed(format!("Fetch task failed: {}", e), 0)
            })
        }
        .boxed()
        .shared()
    }
}

fn merge_statuses<'a, I>(default_model: &RegistryModel, statuses: I) -> RegistryModel
where
    I: IntoIterator<Item = &'a EndpointStatus>,
{
    merge_all(
        default_model,
        statuses.into_iter().filter_map(EndpointStatus::contributed_model),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::testing::{Reply, ScriptedTransport};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn coordinator(
        transport: Arc<ScriptedTransport>,
        endpoints: Vec<Endpoint>,
    ) -> AggregationCoordinator {
        let cache = Arc::new(EndpointCache::new());
        let fetcher = Arc::new(EndpointFetcher::new(
            transport,
            cache.clone(),
            Duration::from_millis(15_000),
        ));
        AggregationCoordinator::new(endpoints, fetcher, cache, RegistryModel::fallback())
    }

    #[tokio::test]
    async fn test_no_endpoints_returns_default() {
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = coordinator(transport.clone(), vec![]);

        assert_eq!(coordinator.wait_for_all().await, RegistryModel::fallback());
        assert_eq!(transport.total_hits(), 0);

        let mut run = coordinator.progressive();
        assert_eq!((&mut run.completion).await.unwrap(), RegistryModel::fallback());

        let updates: Vec<ProgressiveResult> = run.stream().await.collect().await;
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_complete);
        assert_eq!(run.feed.latest().await, Some(updates[0].clone()));
    }

    #[tokio::test]
    async fn test_wait_for_all_unions_groups() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("http://a/model", Reply::json(json!({ "groups": { "foo": {} } })))
                .reply("http://b/model", Reply::json(json!({ "groups": { "bar": {} } }))),
        );
        let coordinator = coordinator(
            transport.clone(),
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        let model = coordinator.wait_for_all().await;
        assert!(model.has_group_type("foo"));
        assert!(model.has_group_type("bar"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_order_wins_over_arrival_order() {
        // b answers first, a is listed first: b's name must still win
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("http://a/model", Reply::json(json!({ "name": "a" })).after_ms(500))
                .reply("http://b/model", Reply::json(json!({ "name": "b" })).after_ms(10)),
        );
        let coordinator = coordinator(
            transport,
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        assert_eq!(coordinator.wait_for_all().await.name, "b");
    }

    #[tokio::test]
    async fn test_resolved_endpoints_are_not_refetched() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("http://a/model", Reply::json(json!({ "groups": { "foo": {} } })))
                .reply(
                    "http://b/model",
                    Reply::error(FetchError::http(500, "Internal Server Error")),
                ),
        );
        let coordinator = coordinator(
            transport.clone(),
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        coordinator.wait_for_all().await;
        coordinator.wait_for_all().await;

        assert_eq!(transport.hits("http://a/model"), 1);
        assert_eq!(transport.hits("http://b/model"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_aggregations_share_fetches() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(
                    "http://a/model",
                    Reply::json(json!({ "groups": { "foo": {} } })).after_ms(100),
                ),
        );
        let coordinator = coordinator(transport.clone(), vec![Endpoint::api("http://a")]);

        let run = coordinator.progressive();
        let (first, second) =
            tokio::join!(coordinator.wait_for_all(), coordinator.wait_for_all());
        let progressive = run.completion.await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, progressive);
        assert_eq!(transport.hits("http://a/model"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_emits_per_endpoint() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(
                    "http://a/model",
                    Reply::json(json!({ "groups": { "foo": {} } })).after_ms(60_000),
                )
                .reply(
                    "http://b/model",
                    Reply::json(json!({ "groups": { "bar": {} } })).after_ms(200),
                ),
        );
        let coordinator = coordinator(
            transport,
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        let started = Instant::now();
        let mut stream = coordinator.progressive().stream().await;
        let mut updates = Vec::new();
        while let Some(update) = stream.next().await {
            updates.push((started.elapsed(), update));
        }

        assert_eq!(updates.len(), 3);

        let (_, initial) = &updates[0];
        assert_eq!(initial.loaded_count, 0);
        assert!(!initial.is_complete);
        assert_eq!(initial.model, RegistryModel::fallback());

        let (at, partial) = &updates[1];
        assert_eq!(*at, Duration::from_millis(200));
        assert_eq!((partial.loaded_count, partial.total_count), (1, 2));
        assert!(!partial.is_complete);
        assert!(partial.model.has_group_type("bar"));

        let (at, last) = &updates[2];
        assert_eq!(*at, Duration::from_millis(15_000));
        assert_eq!((last.loaded_count, last.total_count), (2, 2));
        assert!(last.is_complete);
        assert!(last.model.has_group_type("bar"));
        assert!(!last.model.has_group_type("foo"));
    }

    #[tokio::test]
    async fn test_progressive_all_failed_completes_with_default() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("http://a/model", Reply::empty())
                .reply("http://b/model", Reply::error(FetchError::http(502, "Bad Gateway"))),
        );
        let coordinator = coordinator(
            transport,
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        let updates: Vec<ProgressiveResult> =
            coordinator.progressive().stream().await.collect().await;
        let last = updates.last().unwrap();

        assert!(last.is_complete);
        assert_eq!(last.loaded_count, last.total_count);
        assert_eq!(last.model, RegistryModel::fallback());
    }

    #[tokio::test]
    async fn test_progressive_final_matches_wait_for_all() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(
                    "http://m",
                    Reply::json(json!({ "description": "model uri", "groups": { "foo": {} } })),
                )
                .reply(
                    "http://a/model",
                    Reply::json(json!({
                        "description": "",
                        "groups": { "foo": { "plural": "foos" } }
                    })),
                ),
        );
        let coordinator = coordinator(
            transport,
            vec![Endpoint::model_uri("http://m"), Endpoint::api("http://a")],
        );

        let progressive = coordinator.progressive().completion.await.unwrap();
        let joined = coordinator.wait_for_all().await;

        assert_eq!(progressive, joined);
        assert_eq!(joined.description, "model uri");
        assert_eq!(joined.groups["foo"].plural, "foos");
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_keeps_simultaneous_resolutions() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(
                    "http://a/model",
                    Reply::json(json!({ "groups": { "foo": {} } })).after_ms(50),
                )
                .reply(
                    "http://b/model",
                    Reply::json(json!({ "groups": { "bar": {} } })).after_ms(50),
                ),
        );
        let coordinator = coordinator(
            transport,
            vec![Endpoint::api("http://a"), Endpoint::api("http://b")],
        );

        let run = coordinator.progressive();
        let (early, late) = tokio::join!(run.stream(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            run.stream().await
        });
        let early: Vec<ProgressiveResult> = early.collect().await;
        let late: Vec<ProgressiveResult> = late.collect().await;

        let counts: Vec<usize> = early.iter().map(|u| u.loaded_count).collect();
        assert_eq!(counts, vec![0, 1, 2]);
        assert_eq!(early, late);
        assert!(early[2].model.has_group_type("foo"));
        assert!(early[2].model.has_group_type("bar"));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_stall_feed() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("http://a/model", Reply::json(json!({ "groups": { "foo": {} } }))),
        );
        let coordinator = coordinator(transport, vec![Endpoint::api("http://a")]);

        let run = coordinator.progressive();
        drop(run.stream().await);
        let kept: Vec<ProgressiveResult> = run.stream().await.collect().await;

        assert_eq!(kept.len(), 2);
        assert!(kept[1].is_complete);
        assert!(run.completion.await.unwrap().has_group_type("foo"));
    }
}

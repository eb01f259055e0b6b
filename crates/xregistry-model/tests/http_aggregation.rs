//! End-to-end aggregation against mock registry servers

use futures::StreamExt;
use httpmock::prelude::*;
use serde_json::json;
use xregistry_model::{LoadStatus, ModelService, ModelServiceConfig};

#[tokio::test]
async fn test_two_registries_are_merged() {
    let registry_a = MockServer::start_async().await;
    let registry_b = MockServer::start_async().await;

    let model_a = registry_a
        .mock_async(|when, then| {
            when.method(GET).path("/model");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "specversion": "1.0-rc1",
                    "description": "A",
                    "capabilities": { "apis": ["/model"] },
                    "groups": { "foo": { "plural": "foo", "singular": "foo" } }
                }));
        })
        .await;
    let model_b = registry_b
        .mock_async(|when, then| {
            when.method(GET).path("/model");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "description": "",
                    "capabilities": { "apis": ["/export"] },
                    "groups": { "bar": { "plural": "bar", "singular": "bar" } }
                }));
        })
        .await;

    let config = ModelServiceConfig::builder()
        .api_endpoint(&registry_a.base_url())
        .api_endpoint(&registry_b.base_url())
        .build();
    let service = ModelService::from_config(config).unwrap();

    let (first, second) = tokio::join!(service.get_registry_model(), service.get_registry_model());

    assert_eq!(first, second);
    assert!(first.has_group_type("foo"));
    assert!(first.has_group_type("bar"));
    assert_eq!(first.description, "A");
    assert!(first.capabilities.apis.contains("/model"));
    assert!(first.capabilities.apis.contains("/export"));

    model_a.assert_hits_async(1).await;
    model_b.assert_hits_async(1).await;

    assert_eq!(
        service.get_api_endpoints_for_group_type("bar").await,
        vec![registry_b.base_url()]
    );
}

#[tokio::test]
async fn test_failing_registry_is_tolerated() {
    let healthy = MockServer::start_async().await;
    let broken = MockServer::start_async().await;

    healthy
        .mock_async(|when, then| {
            when.method(GET).path("/model.json");
            then.status(200).json_body(json!({ "groups": { "endpoints": {} } }));
        })
        .await;
    broken
        .mock_async(|when, then| {
            when.method(GET).path("/model");
            then.status(500);
        })
        .await;

    let config = ModelServiceConfig::builder()
        .model_uri(&healthy.url("/model.json"))
        .api_endpoint(&broken.base_url())
        .build();
    let service = ModelService::from_config(config).unwrap();

    let updates: Vec<_> = service.get_progressive_registry_model().await.collect().await;
    let last = updates.last().unwrap();
    assert!(last.is_complete);
    assert_eq!(last.total_count, 2);
    assert!(last.model.has_group_type("endpoints"));

    let statuses = service.endpoint_statuses().await;
    let broken_status = statuses
        .iter()
        .find(|(endpoint, _)| *endpoint == broken.base_url())
        .map(|(_, status)| status)
        .unwrap();
    assert_eq!(broken_status.status, LoadStatus::Failed);
    assert_eq!(broken_status.error.as_deref(), Some("HTTP 500: Internal Server Error"));
}

#[tokio::test]
async fn test_clear_all_caches_issues_fresh_requests() {
    let registry = MockServer::start_async().await;
    let model = registry
        .mock_async(|when, then| {
            when.method(GET).path("/model");
            then.status(200).json_body(json!({ "groups": { "foo": {} } }));
        })
        .await;

    let config = ModelServiceConfig::builder()
        .api_endpoint(&registry.base_url())
        .build();
    let service = ModelService::from_config(config).unwrap();

    service.get_registry_model().await;
    service.get_registry_model().await;
    model.assert_hits_async(1).await;

    service.clear_all_caches().await;
    service.get_registry_model().await;
    model.assert_hits_async(2).await;
}

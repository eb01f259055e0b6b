//! Configuration for the model service
//!
//! Supports loading from JSON/YAML files. Keys follow the viewer's
//! `config.json` (`modelUris`, `apiEndpoints`, ...).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "XREGISTRY_MODEL_CONFIG";

/// Main configuration for the model service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelServiceConfig {
    /// URLs that serve a model document directly
    #[serde(default)]
    pub model_uris: Vec<String>,

    /// Registry API base URLs; `/model` is appended when fetching
    #[serde(default)]
    pub api_endpoints: Vec<String>,

    /// Hard per-endpoint deadline in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Group types pinned to particular endpoints
    #[serde(default)]
    pub endpoint_affinity: Vec<EndpointAffinity>,
}

fn default_fetch_timeout_ms() -> u64 {
    15_000
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            model_uris: vec![],
            api_endpoints: vec![],
            fetch_timeout_ms: default_fetch_timeout_ms(),
            endpoint_affinity: vec![],
        }
    }
}

impl ModelServiceConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
            serde_yaml::from_str(&content)
                .with_context(|| "Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content)
                .with_context(|| "Failed to parse JSON config")?
        };

        info!(
            "Loaded model config from {} ({} model URIs, {} API endpoints)",
            path.display(),
            config.model_uris.len(),
            config.api_endpoints.len()
        );
        Ok(config)
    }

    /// Load from `$XREGISTRY_MODEL_CONFIG` or default paths, with fallbacks
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(path);
        }

        let paths = [
            "/etc/xregistry-viewer/config.json",
            "/etc/xregistry-viewer/config.yaml",
            "config.json",
        ];

        for path in paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        info!("No model config found, using defaults");
        Ok(Self::default())
    }

    /// Create a builder for programmatic configuration
    pub fn builder() -> ModelServiceConfigBuilder {
        ModelServiceConfigBuilder::default()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Every endpoint to fetch: model URIs first, then API endpoints.
    /// Repeated entries are kept once, at their first position.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut seen = HashSet::new();
        self.model_uris
            .iter()
            .map(|uri| Endpoint::model_uri(uri))
            .chain(self.api_endpoints.iter().map(|api| Endpoint::api(api)))
            .filter(|endpoint| seen.insert(endpoint.key.clone()))
            .collect()
    }

    /// The affinity rule for a group type, if one is configured
    pub fn affinity_for(&self, group_type: &str) -> Option<&EndpointAffinity> {
        self.endpoint_affinity
            .iter()
            .find(|rule| rule.group_type == group_type)
    }
}

/// Builder for ModelServiceConfig
#[derive(Default)]
pub struct ModelServiceConfigBuilder {
    config: ModelServiceConfig,
}

impl ModelServiceConfigBuilder {
    pub fn model_uri(mut self, uri: &str) -> Self {
        self.config.model_uris.push(uri.to_string());
        self
    }

    pub fn api_endpoint(mut self, url: &str) -> Self {
        self.config.api_endpoints.push(url.to_string());
        self
    }

    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    pub fn affinity(mut self, group_type: &str, endpoint_contains: &str) -> Self {
        self.config.endpoint_affinity.push(EndpointAffinity {
            group_type: group_type.to_string(),
            endpoint_contains: endpoint_contains.to_string(),
        });
        self
    }

    pub fn build(self) -> ModelServiceConfig {
        self.config
    }
}

/// Restricts a group type to API endpoints whose URL contains a substring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAffinity {
    pub group_type: String,
    pub endpoint_contains: String,
}

impl EndpointAffinity {
    pub fn matches(&self, endpoint: &str) -> bool {
        endpoint.contains(&self.endpoint_contains)
    }
}

/// How an endpoint's model URL is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Serves the model document at the configured URL
    ModelUri,
    /// Registry API root; the model lives under `/model`
    Api,
}

/// A configured endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// The endpoint string as configured; used as the cache key
    pub key: String,
    /// Where the model document is fetched from
    pub url: String,
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn model_uri(uri: &str) -> Self {
        Self {
            key: uri.to_string(),
            url: uri.to_string(),
            kind: EndpointKind::ModelUri,
        }
    }

    pub fn api(base: &str) -> Self {
        Self {
            key: base.to_string(),
            url: format!("{}/model", base.trim_end_matches('/')),
            kind: EndpointKind::Api,
        }
    }
}

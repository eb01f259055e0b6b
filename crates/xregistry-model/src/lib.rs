//! xregistry-model: multi-endpoint registry model aggregation
//!
//! The xRegistry viewer can point at several registries at once. Each one
//! serves its own `/model` document describing its group types, resource
//! types and attributes. This crate fetches all of them in parallel, merges
//! them into a single model, caches per-endpoint outcomes, and streams
//! partial merges to the UI while slower endpoints are still loading.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ModelService                           │
//! │   merged-model cache · request coalescing · invalidation    │
//! │                           │                                 │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │              AggregationCoordinator                   │  │
//! │  │   wait_for_all (fan-in)   ·   progressive (feed)      │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │          │                 │                  │             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ EndpointFetch│  │ EndpointFetch│  │ EndpointFetch│  ...  │
//! │  │  (15s limit) │  │  (15s limit) │  │  (15s limit) │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │          │                 │                  │             │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │   EndpointCache (loading/success/failed/timeout)      │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                           │                                 │
//! │                 merge (configured order)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xregistry_model::{ModelService, ModelServiceConfig};
//! use futures::StreamExt;
//!
//! let config = ModelServiceConfig::load("config.json")?;
//! let service = ModelService::from_config(config)?;
//!
//! // Everything at once
//! let model = service.get_registry_model().await;
//!
//! // Or as it arrives
//! let mut updates = service.get_progressive_registry_model().await;
//! while let Some(update) = updates.next().await {
//!     render(&update.model, update.loaded_count, update.total_count);
//! }
//! ```

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use aggregator::{
    AggregationCoordinator, ModelStream, ProgressiveFeed, ProgressiveResult, ProgressiveRun,
};
pub use cache::{CacheStats, EndpointCache, EndpointStatus, LoadStatus};
pub use client::{EndpointFetcher, HttpTransport, ModelTransport};
pub use config::{Endpoint, EndpointAffinity, EndpointKind, ModelServiceConfig};
pub use error::{Error, FetchError, Result};
pub use merge::{merge, merge_all};
pub use model::{AttributeSchema, Capabilities, GroupType, RegistryModel, ResourceType};
pub use service::{ModelService, ModelServiceStats};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        EndpointStatus, LoadStatus, ModelService, ModelServiceConfig, ModelStream,
        ProgressiveResult, RegistryModel,
    };
}

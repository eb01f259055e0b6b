//! Registry model documents
//!
//! These types mirror the `/model` document served by an xRegistry
//! endpoint. Registries emit lowercase keys (`specversion`, `registryid`,
//! `hasdocument`); the camelCase spellings are accepted as well and are what
//! we serialize. Any subset of the document is valid input: missing fields
//! fall back to empty values so that partial models can still be merged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Spec version reported by the built-in fallback model
pub const DEFAULT_SPEC_VERSION: &str = "1.0-rc1";

/// A registry's schema: capabilities plus its group types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryModel {
    #[serde(default, alias = "specversion", deserialize_with = "null_as_empty")]
    pub spec_version: String,

    #[serde(default, alias = "registryid", deserialize_with = "null_as_empty")]
    pub registry_id: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub capabilities: Capabilities,

    /// Group types keyed by their plural name
    #[serde(default, deserialize_with = "skip_null_entries")]
    pub groups: BTreeMap<String, GroupType>,
}

/// What the registry API supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub apis: BTreeSet<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub schemas: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<bool>,
}

/// A group type, e.g. `endpoints` or `schemagroups`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupType {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub plural: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub singular: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(default, deserialize_with = "skip_null_entries")]
    pub attributes: BTreeMap<String, AttributeSchema>,

    #[serde(default, deserialize_with = "skip_null_entries")]
    pub resources: BTreeMap<String, ResourceType>,
}

/// A resource type nested under a group type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceType {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub plural: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub singular: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(default, alias = "hasdocument", skip_serializing_if = "Option::is_none")]
    pub has_document: Option<bool>,

    #[serde(default, alias = "maxversions", skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<u64>,

    #[serde(default, deserialize_with = "skip_null_entries")]
    pub attributes: BTreeMap<String, AttributeSchema>,
}

/// Schema of a single attribute. Opaque to the merger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub attr_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    /// Element schema for `array` and `map` attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<AttributeSchema>>,

    /// Member schemas for `object` attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, AttributeSchema>>,

    /// Keys we don't model explicitly (`enum`, `strict`, `immutable`, ...)
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl RegistryModel {
    /// The model used when no endpoint has contributed anything yet
    pub fn fallback() -> Self {
        Self {
            spec_version: DEFAULT_SPEC_VERSION.to_string(),
            registry_id: "xregistry".to_string(),
            name: "xRegistry".to_string(),
            description: "xRegistry metadata registry".to_string(),
            capabilities: Capabilities {
                apis: ["/capabilities", "/export", "/model"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                schemas: BTreeSet::from([format!("xRegistry-json/{}", DEFAULT_SPEC_VERSION)]),
                pagination: Some(false),
            },
            groups: BTreeMap::new(),
        }
    }

    /// Whether this model declares the given group type
    pub fn has_group_type(&self, group_type: &str) -> bool {
        self.groups.contains_key(group_type)
    }

    /// Parse a model from a JSON value
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Treat an explicit `null` the same as a missing field
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Drop map entries whose value is `null` instead of rejecting the document
fn skip_null_entries<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: Option<BTreeMap<String, Option<T>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect())
}

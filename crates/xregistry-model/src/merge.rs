//! Model merging
//!
//! Merging is additive: group types, resource types and attributes are
//! never dropped, only added or augmented. Scalar fields take the later
//! value only when it is non-empty, so a sparse endpoint cannot blank out
//! what a richer one already provided. Key sets union associatively, but
//! scalar precedence depends on application order; callers fold in a
//! stable order (see [`merge_all`]).

use crate::model::{AttributeSchema, Capabilities, GroupType, RegistryModel, ResourceType};
use std::collections::BTreeMap;

/// Merge `addition` into `base`, returning the combined model
pub fn merge(base: &RegistryModel, addition: &RegistryModel) -> RegistryModel {
    let mut merged = base.clone();
    merge_into(&mut merged, addition);
    merged
}

/// Left-fold `merge` over `additions`, in iteration order
pub fn merge_all<'a, I>(base: &RegistryModel, additions: I) -> RegistryModel
where
    I: IntoIterator<Item = &'a RegistryModel>,
{
    let mut merged = base.clone();
    for addition in additions {
        merge_into(&mut merged, addition);
    }
    merged
}

/// In-place variant of [`merge`]
pub fn merge_into(base: &mut RegistryModel, addition: &RegistryModel) {
    take_non_empty(&mut base.spec_version, &addition.spec_version);
    take_non_empty(&mut base.registry_id, &addition.registry_id);
    take_non_empty(&mut base.name, &addition.name);
    take_non_empty(&mut base.description, &addition.description);

    merge_capabilities(&mut base.capabilities, &addition.capabilities);

    for (name, group) in &addition.groups {
        match base.groups.get_mut(name) {
            Some(existing) => merge_group_type(existing, group),
            None => {
                base.groups.insert(name.clone(), group.clone());
            }
        }
    }
}

fn merge_capabilities(base: &mut Capabilities, addition: &Capabilities) {
    base.apis.extend(addition.apis.iter().cloned());
    base.schemas.extend(addition.schemas.iter().cloned());
    if addition.pagination.is_some() {
        base.pagination = addition.pagination;
    }
}

fn merge_group_type(base: &mut GroupType, addition: &GroupType) {
    take_non_empty(&mut base.plural, &addition.plural);
    take_non_empty(&mut base.singular, &addition.singular);
    take_non_empty(&mut base.description, &addition.description);

    merge_attributes(&mut base.attributes, &addition.attributes);

    for (name, resource) in &addition.resources {
        match base.resources.get_mut(name) {
            Some(existing) => merge_resource_type(existing, resource),
            None => {
                base.resources.insert(name.clone(), resource.clone());
            }
        }
    }
}

fn merge_resource_type(base: &mut ResourceType, addition: &ResourceType) {
    take_non_empty(&mut base.plural, &addition.plural);
    take_non_empty(&mut base.singular, &addition.singular);
    take_non_empty(&mut base.description, &addition.description);

    if addition.has_document.is_some() {
        base.has_document = addition.has_document;
    }
    if addition.max_versions.is_some() {
        base.max_versions = addition.max_versions;
    }

    merge_attributes(&mut base.attributes, &addition.attributes);
}

/// Shallow union; on key collision the addition's schema replaces ours
fn merge_attributes(
    base: &mut BTreeMap<String, AttributeSchema>,
    addition: &BTreeMap<String, AttributeSchema>,
) {
    for (name, schema) in addition {
        base.insert(name.clone(), schema.clone());
    }
}

fn take_non_empty(target: &mut String, candidate: &str) {
    if !candidate.is_empty() {
        *target = candidate.to_string();
    }
}

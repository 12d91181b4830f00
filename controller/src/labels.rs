//! Standard labels and owner-references applied to every operator-managed
//! derived object.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use automotive_build_utils::constants::{
    LABEL_MANAGED_BY, LABEL_PART_OF, LABEL_RESOURCE_TYPE, MANAGED_BY_VALUE, PART_OF_VALUE,
};

/// The three labels every derived object carries, plus a resource-type tag
/// (e.g. `"workspace"`, `"manifest"`, `"upload-pod"`, `"push-auth"`).
#[must_use]
pub fn standard_labels(resource_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (LABEL_PART_OF.to_string(), PART_OF_VALUE.to_string()),
        (LABEL_RESOURCE_TYPE.to_string(), resource_type.to_string()),
    ])
}

/// Build an owner-reference pointing back at `owner`, used for cascading
/// deletion of every derived object.
pub fn owner_reference<K>(owner: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

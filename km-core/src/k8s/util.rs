use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    DeleteParams,
    ListParams,
    Resource,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::*;
use crate::prelude::*;

/// An API handle scoped to the namespace of `obj`; children always live next to their owner.
pub fn namespaced_api<K, O>(client: &kube::Client, obj: &O) -> anyhow::Result<kube::Api<K>>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    O: Resource,
{
    let ns = obj
        .namespace()
        .ok_or_else(|| KubernetesError::missing_namespace(&obj.name_any()))?;
    Ok(kube::Api::namespaced(client.clone(), &ns))
}

pub fn owner_reference<K>(owner: &K, controller: bool) -> anyhow::Result<metav1::OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let uid = owner.uid().ok_or_else(|| KubernetesError::missing_owner_ref(&owner.name_any()))?;
    Ok(metav1::OwnerReference {
        api_version: K::api_version(&()).into(),
        kind: K::kind(&()).into(),
        name: owner.name_any(),
        uid,

        // if the delete propagation policy is set to foreground, this will block
        // the owner from being deleted until this object is deleted
        block_owner_deletion: Some(true),
        controller: Some(controller),
    })
}

/// Metadata for a child of `owner`: same namespace and labels as the owner, controlled by it, and
/// named by the apiserver from `<owner>-<suffix>-`.  The owner's status label describes the owner
/// only, so it isn't passed down.
pub fn build_child_meta<K>(owner: &K, suffix: &str) -> anyhow::Result<metav1::ObjectMeta>
where
    K: Resource<DynamicType = ()>,
{
    let labels: BTreeMap<_, _> = owner
        .labels()
        .iter()
        .filter(|(k, _)| k.as_str() != STATUS_LABEL_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(metav1::ObjectMeta {
        namespace: owner.namespace(),
        generate_name: Some(format!("{}-{suffix}-", owner.name_any())),
        labels: (!labels.is_empty()).then_some(labels),
        owner_references: Some(vec![owner_reference(owner, true)?]),
        ..Default::default()
    })
}

pub fn label_selector(labels: &[(&str, &str)]) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

pub async fn delete_ignore_not_found<K>(api: &kube::Api<K>, name: &str) -> EmptyResult
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::background()).await {
        Err(err) if is_not_found(&err) => Ok(()),
        res => res.map(|_| ()).map_err(|e| e.into()),
    }
}

/// Delete everything `lp` selects.  Returns how many objects the apiserver reported deleting, or
/// None if it answered with a bare Status instead of the list; nothing to delete is Some(0).
pub async fn delete_collection_ignore_not_found<K>(api: &kube::Api<K>, lp: &ListParams) -> anyhow::Result<Option<usize>>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    match api.delete_collection(&DeleteParams::background(), lp).await {
        Ok(res) => Ok(res.left().map(|list| list.items.len())),
        Err(err) if is_not_found(&err) => Ok(Some(0)),
        Err(err) => Err(err.into()),
    }
}

/// Build a JSON merge patch that turns `old` into `new`; keys missing from `new` are nulled out,
/// since a merge patch on a map never removes anything by itself.
pub fn map_merge_patch<V>(old: &BTreeMap<String, V>, new: &BTreeMap<String, V>) -> anyhow::Result<serde_json::Value>
where
    V: Serialize,
{
    let mut patch = serde_json::Map::new();
    for key in old.keys().filter(|k| !new.contains_key(*k)) {
        patch.insert(key.clone(), serde_json::Value::Null);
    }
    for (key, val) in new {
        patch.insert(key.clone(), serde_json::to_value(val)?);
    }
    Ok(json!(patch))
}

impl<T: Resource> KubeResourceExt for T {
    fn namespaced_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any().clone(),
        }
    }

    // A missing label map and an empty one are the same thing
    fn labels_match(&self, other: &Self) -> bool {
        self.labels() == other.labels()
    }
}

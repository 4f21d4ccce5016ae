use kube::api::Patch;
use serde_json::json;
use tracing::*;

use super::*;
use crate::prelude::*;

fn finalizer_patch<K: KmakeResource>(obj: &K, finalizers: Vec<String>) -> serde_json::Value {
    let mut patch = json!({"metadata": {"finalizers": finalizers}});
    if let Some(rv) = obj.resource_version() {
        patch["metadata"]["resourceVersion"] = json!(rv);
    }
    patch
}

pub async fn add_finalizer<K: KmakeResource>(client: &kube::Client, obj: &K) -> anyhow::Result<K> {
    info!("adding finalizer {} to {}", K::FINALIZER, obj.namespaced_name());
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(K::FINALIZER.into());

    let api = namespaced_api::<K, K>(client, obj)?;
    Ok(api
        .patch(&obj.name_any(), &Default::default(), &Patch::Merge(finalizer_patch(obj, finalizers)))
        .await?)
}

pub async fn remove_finalizer<K: KmakeResource>(client: &kube::Client, obj: &K) -> anyhow::Result<K> {
    info!("removing finalizer {} from {}", K::FINALIZER, obj.namespaced_name());
    let finalizers: Vec<String> = obj.finalizers().iter().filter(|f| *f != K::FINALIZER).cloned().collect();

    let api = namespaced_api::<K, K>(client, obj)?;
    Ok(api
        .patch(&obj.name_any(), &Default::default(), &Patch::Merge(finalizer_patch(obj, finalizers)))
        .await?)
}
